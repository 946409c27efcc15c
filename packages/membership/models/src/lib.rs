#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the sensitive-zone membership engine.
//!
//! Survey records and polygon layers enter the engine as the raw types
//! defined here ([`RawRecord`], [`RawLayer`]) and leave it as
//! [`MembershipResult`] values plus a side-channel list of
//! [`RejectedInput`]s. Nothing in this crate performs geometry work.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Free-form attribute bag carried by records and polygons.
///
/// Opaque to the join algorithm; passed through unmodified.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// One `[x, y]` ring of positions in the layer's source CRS, exactly as read.
///
/// For WGS84 layers `x` is longitude and `y` is latitude (`GeoJSON` axis
/// order). Rings are not closed implicitly.
pub type Ring = Vec<[f64; 2]>;

/// Canonical CRS label for geographic WGS84 degrees.
pub const WGS84: &str = "EPSG:4326";

/// A survey record as supplied by the record-retrieval collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    /// Opaque stable identifier, unique per record.
    pub id: String,
    /// Raw positional string (`"<lat> <lon> [alt] [accuracy]"`).
    pub location: Option<String>,
    /// Record fields, passed through to alerting unmodified.
    pub attributes: Attributes,
}

/// A survey record whose position parsed and validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyPoint {
    /// Identifier of the originating [`RawRecord`].
    pub id: String,
    /// Latitude in WGS84 degrees, within `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in WGS84 degrees, within `[-180, 180]`.
    pub longitude: f64,
    /// Record fields, passed through unmodified.
    pub attributes: Attributes,
}

/// Polygon geometry before validation or reprojection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "rings", rename_all = "snake_case")]
pub enum RawGeometry {
    /// Outer ring followed by zero or more hole rings.
    Polygon(Vec<Ring>),
    /// Several polygons, each an outer ring followed by its holes.
    MultiPolygon(Vec<Vec<Ring>>),
}

impl RawGeometry {
    /// Returns the polygons of this geometry as ring lists.
    #[must_use]
    pub fn polygons(&self) -> Vec<&[Ring]> {
        match self {
            Self::Polygon(rings) => vec![rings.as_slice()],
            Self::MultiPolygon(polygons) => polygons.iter().map(Vec::as_slice).collect(),
        }
    }

    /// Applies `f` to every position, producing a new geometry.
    #[must_use]
    pub fn map_positions(&self, mut f: impl FnMut([f64; 2]) -> [f64; 2]) -> Self {
        let mut map_rings = |rings: &[Ring]| -> Vec<Ring> {
            rings
                .iter()
                .map(|ring| ring.iter().map(|p| f(*p)).collect())
                .collect()
        };

        match self {
            Self::Polygon(rings) => Self::Polygon(map_rings(rings)),
            Self::MultiPolygon(polygons) => {
                Self::MultiPolygon(polygons.iter().map(|rings| map_rings(rings)).collect())
            }
        }
    }
}

/// A single polygon feature of a layer, as read from its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFeature {
    /// Feature identifier, if the source provides one.
    pub id: Option<String>,
    /// Polygon or multi-polygon rings.
    pub geometry: RawGeometry,
    /// Feature properties (e.g. the zone-type label).
    pub attributes: Attributes,
}

/// A named polygon layer tagged with its source reference system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLayer {
    /// Layer name (e.g. `"peatland"`, `"protected_areas"`).
    pub name: String,
    /// Source CRS identifier (e.g. `"EPSG:4326"`, `"EPSG:3857"`).
    pub crs: String,
    /// Features in original load order.
    pub features: Vec<RawFeature>,
}

impl RawLayer {
    /// Identifier used when reporting a problem with the feature at `index`.
    #[must_use]
    pub fn feature_identifier(&self, index: usize) -> String {
        let feature_id = self
            .features
            .get(index)
            .and_then(|f| f.id.clone())
            .unwrap_or_else(|| index.to_string());
        format!("{}/{feature_id}", self.name)
    }
}

/// Membership of one record in one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerMembership {
    /// Whether the point intersects at least one polygon of the layer.
    pub member: bool,
    /// Identifier of the first matching polygon in load order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polygon_id: Option<String>,
    /// Attribute bag of the first matching polygon in load order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl LayerMembership {
    /// A non-membership entry.
    #[must_use]
    pub const fn outside() -> Self {
        Self {
            member: false,
            polygon_id: None,
            attributes: None,
        }
    }
}

/// Per-record membership flags across all configured layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipResult {
    /// Identifier of the classified [`SurveyPoint`].
    pub point_id: String,
    /// Layer name -> membership.
    pub layer_memberships: BTreeMap<String, LayerMembership>,
}

impl MembershipResult {
    /// Whether the record falls inside the named layer.
    #[must_use]
    pub fn is_member(&self, layer: &str) -> bool {
        self.layer_memberships.get(layer).is_some_and(|m| m.member)
    }

    /// Names of the layers the record falls inside, in name order.
    #[must_use]
    pub fn member_layers(&self) -> Vec<&str> {
        self.layer_memberships
            .iter()
            .filter(|(_, m)| m.member)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Why an input record, polygon, or layer was rejected.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Positional string missing, too short, or non-numeric.
    MalformedCoordinate,
    /// Latitude/longitude outside the WGS84 range.
    OutOfRange,
    /// Layer CRS identifier not recognized.
    UnsupportedCrs,
    /// Unclosed, degenerate, or self-intersecting ring.
    MalformedPolygon,
    /// Record identifier already used by an earlier record in the batch.
    DuplicateId,
}

/// An input excluded from analysis, reported alongside the results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedInput {
    /// Record id, `"<layer>/<polygon id>"`, or layer name.
    pub identifier: String,
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable reason.
    pub detail: String,
}

impl RejectedInput {
    /// Creates a new rejection entry.
    #[must_use]
    pub fn new(identifier: impl Into<String>, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            detail: detail.into(),
        }
    }
}

/// Outcome of one analysis run over one record batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// One result per valid record, in input order.
    pub results: Vec<MembershipResult>,
    /// Rejected layers and polygons first, then rejected records.
    pub errors: Vec<RejectedInput>,
}
