#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory polygon layer store and point-in-polygon join.
//!
//! Each sensitive-zone layer is validated once, indexed in an R-tree keyed
//! by polygon bounding box, and published into a [`LayerStore`] as an
//! immutable [`ZoneLayer`]. Joins take a [`StoreSnapshot`] and never lock
//! while testing points, so a concurrent reload only affects the next
//! batch.

pub mod contains;
pub mod join;
pub mod validate;

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use geo::{BoundingRect, MultiPolygon, Point};
use rstar::{AABB, RTree, RTreeObject};
use thiserror::Error;
use traceability_membership_models::{Attributes, ErrorKind, RawLayer, RejectedInput, SurveyPoint};

pub use contains::{contains, point_of};
pub use join::{JoinResult, LayerMatch, join, join_layer_by_name};
pub use validate::{PolygonError, validate_feature};

/// Errors that prevent a whole layer from entering the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayerError {
    /// The layer has not been normalized to WGS84.
    #[error("layer '{layer}' is in {crs}, expected WGS84")]
    NotNormalized {
        /// Layer name.
        layer: String,
        /// CRS label found on the layer.
        crs: String,
    },
}

impl LayerError {
    /// Maps this error onto the shared rejection category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotNormalized { .. } => ErrorKind::UnsupportedCrs,
        }
    }
}

/// A validated polygon of a layer, in WGS84 degrees.
#[derive(Debug, Clone)]
pub struct ZonePolygon {
    layer: String,
    id: String,
    order: usize,
    geometry: MultiPolygon<f64>,
    attributes: Attributes,
    envelope: AABB<[f64; 2]>,
}

impl ZonePolygon {
    /// Wraps already-validated geometry.
    #[must_use]
    pub fn new(
        layer: impl Into<String>,
        id: impl Into<String>,
        order: usize,
        geometry: MultiPolygon<f64>,
        attributes: Attributes,
    ) -> Self {
        let envelope = compute_envelope(&geometry);
        Self {
            layer: layer.into(),
            id: id.into(),
            order,
            geometry,
            attributes,
            envelope,
        }
    }

    /// Name of the layer this polygon belongs to.
    #[must_use]
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Feature id, or the position within the layer's source.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Position in the layer's original load order.
    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    /// Polygon geometry (`x` = longitude, `y` = latitude).
    #[must_use]
    pub const fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    /// Attribute bag attached by the layer source.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Exact containment test with the inclusive boundary policy.
    #[must_use]
    pub fn contains(&self, point: &SurveyPoint) -> bool {
        contains(point_of(point), &self.geometry)
    }
}

/// R-tree entry pointing back into [`ZoneLayer::polygons`].
struct BoundaryEntry {
    order: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for BoundaryEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// One named layer, fully validated and indexed.
pub struct ZoneLayer {
    name: String,
    polygons: Vec<Arc<ZonePolygon>>,
    index: RTree<BoundaryEntry>,
}

impl ZoneLayer {
    /// Validates every feature of a WGS84 layer and indexes the valid ones.
    ///
    /// Invalid features are skipped and returned as rejections; the layer
    /// itself is still built from the remainder.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::NotNormalized`] if the layer's CRS is not WGS84.
    pub fn build(layer: &RawLayer) -> Result<(Self, Vec<RejectedInput>), LayerError> {
        if !traceability_crs::is_wgs84(&layer.crs) {
            return Err(LayerError::NotNormalized {
                layer: layer.name.clone(),
                crs: layer.crs.clone(),
            });
        }

        let mut polygons = Vec::with_capacity(layer.features.len());
        let mut rejected = Vec::new();

        for (index, feature) in layer.features.iter().enumerate() {
            match validate_feature(&layer.name, index, feature) {
                Ok(polygon) => polygons.push(polygon),
                Err(e) => {
                    let identifier = layer.feature_identifier(index);
                    log::warn!("Rejected polygon {identifier}: {e}");
                    rejected.push(RejectedInput::new(identifier, e.kind(), e.to_string()));
                }
            }
        }

        Ok((Self::from_polygons(&layer.name, polygons), rejected))
    }

    /// Indexes polygons that are already validated and in WGS84.
    ///
    /// Load order is the order of `polygons`; each polygon's order is
    /// reassigned to its position here.
    #[must_use]
    pub fn from_polygons(name: &str, polygons: Vec<ZonePolygon>) -> Self {
        let polygons: Vec<Arc<ZonePolygon>> = polygons
            .into_iter()
            .enumerate()
            .map(|(order, mut polygon)| {
                polygon.order = order;
                polygon.layer = name.to_string();
                Arc::new(polygon)
            })
            .collect();

        let entries = polygons
            .iter()
            .map(|p| BoundaryEntry {
                order: p.order,
                envelope: p.envelope,
            })
            .collect();

        Self {
            name: name.to_string(),
            polygons,
            index: RTree::bulk_load(entries),
        }
    }

    /// Layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Polygons in load order.
    #[must_use]
    pub fn polygons(&self) -> &[Arc<ZonePolygon>] {
        &self.polygons
    }

    /// Number of polygons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    /// Whether the layer has no polygons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Polygons whose bounding box contains `point`, in load order.
    ///
    /// Bounding-box edges count as inside, so no polygon that could contain
    /// the point is ever left out.
    #[must_use]
    pub fn query_candidates(&self, point: Point<f64>) -> Vec<&Arc<ZonePolygon>> {
        let query_env = AABB::from_point([point.x(), point.y()]);

        let mut orders: Vec<usize> = self
            .index
            .locate_in_envelope_intersecting(&query_env)
            .map(|entry| entry.order)
            .collect();
        orders.sort_unstable();

        orders.into_iter().map(|order| &self.polygons[order]).collect()
    }

    /// First polygon in load order that contains `point`.
    #[must_use]
    pub fn first_match(&self, point: &SurveyPoint) -> Option<&Arc<ZonePolygon>> {
        self.query_candidates(point_of(point))
            .into_iter()
            .find(|polygon| polygon.contains(point))
    }
}

/// An immutable view of the store taken at one instant.
#[derive(Clone, Default)]
pub struct StoreSnapshot {
    layers: BTreeMap<String, Arc<ZoneLayer>>,
}

impl StoreSnapshot {
    /// Looks up a layer by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ZoneLayer>> {
        self.layers.get(name)
    }

    /// Layers in name order.
    pub fn layers(&self) -> impl Iterator<Item = &Arc<ZoneLayer>> {
        self.layers.values()
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether no layer is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// `(layer name, polygon)` pairs worth testing for `point`.
    #[must_use]
    pub fn query_candidates(&self, point: Point<f64>) -> Vec<(&str, &Arc<ZonePolygon>)> {
        self.layers
            .values()
            .flat_map(|layer| {
                layer
                    .query_candidates(point)
                    .into_iter()
                    .map(|polygon| (layer.name(), polygon))
            })
            .collect()
    }
}

/// Process-lifetime collection of named layers.
///
/// Loading a layer replaces any layer of the same name in one swap: the new
/// layer is fully built before the write lock is taken, and readers holding
/// an older [`StoreSnapshot`] keep the layer they started with.
#[derive(Default)]
pub struct LayerStore {
    layers: RwLock<BTreeMap<String, Arc<ZoneLayer>>>,
}

impl LayerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `layer`, returning the layer it replaced.
    pub fn load(&self, layer: ZoneLayer) -> Option<Arc<ZoneLayer>> {
        let name = layer.name().to_string();
        let layer = Arc::new(layer);
        log::info!("Loaded {} polygons into layer '{name}'", layer.len());

        self.layers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, layer)
    }

    /// Removes a layer, returning it if it was loaded.
    pub fn remove(&self, name: &str) -> Option<Arc<ZoneLayer>> {
        self.layers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Looks up a layer by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ZoneLayer>> {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of the loaded layers, in name order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Takes a consistent view of every loaded layer.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            layers: self
                .layers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// `(layer name, polygon)` pairs worth testing for `point`.
    #[must_use]
    pub fn query_candidates(&self, point: Point<f64>) -> Vec<(String, Arc<ZonePolygon>)> {
        self.snapshot()
            .query_candidates(point)
            .into_iter()
            .map(|(name, polygon)| (name.to_string(), Arc::clone(polygon)))
            .collect()
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use geo::{LineString, MultiPolygon, Polygon};
    use traceability_membership_models::{Attributes, SurveyPoint};

    use crate::ZonePolygon;

    pub fn square(min: f64, max: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![(min, min), (min, max), (max, max), (max, min), (min, min)]),
            vec![],
        )
    }

    pub fn zone(id: &str, polygon: Polygon<f64>, label: &str) -> ZonePolygon {
        let mut attributes = Attributes::new();
        attributes.insert("NAMOBJ".to_string(), label.into());
        ZonePolygon::new("zones", id, 0, MultiPolygon(vec![polygon]), attributes)
    }

    pub fn point(id: &str, latitude: f64, longitude: f64) -> SurveyPoint {
        SurveyPoint {
            id: id.to_string(),
            latitude,
            longitude,
            attributes: Attributes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{point, square, zone};
    use super::*;
    use traceability_membership_models::{RawFeature, RawGeometry, WGS84};

    fn raw_square(min: f64, max: f64) -> RawGeometry {
        RawGeometry::Polygon(vec![vec![[min, min], [min, max], [max, max], [max, min], [min, min]]])
    }

    #[test]
    fn candidates_cover_bounding_box_edges() {
        let layer = ZoneLayer::from_polygons("zones", vec![zone("a", square(-1.0, 1.0), "A")]);
        assert_eq!(layer.query_candidates(Point::new(1.0, 1.0)).len(), 1);
        assert_eq!(layer.query_candidates(Point::new(0.0, -1.0)).len(), 1);
        assert!(layer.query_candidates(Point::new(1.000_001, 0.0)).is_empty());
    }

    #[test]
    fn candidates_are_in_load_order() {
        let layer = ZoneLayer::from_polygons(
            "zones",
            vec![
                zone("big", square(-10.0, 10.0), "Big"),
                zone("small", square(-1.0, 1.0), "Small"),
                zone("mid", square(-5.0, 5.0), "Mid"),
            ],
        );
        let ids: Vec<&str> = layer
            .query_candidates(Point::new(0.0, 0.0))
            .into_iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(ids, vec!["big", "small", "mid"]);
    }

    #[test]
    fn first_match_uses_load_order() {
        let layer = ZoneLayer::from_polygons(
            "zones",
            vec![
                zone("outer", square(-10.0, 10.0), "Outer"),
                zone("inner", square(-1.0, 1.0), "Inner"),
            ],
        );
        let hit = layer.first_match(&point("p", 0.0, 0.0)).unwrap();
        assert_eq!(hit.id(), "outer");
        assert_eq!(hit.order(), 0);
        assert_eq!(hit.layer(), "zones");
    }

    #[test]
    fn build_rejects_unnormalized_layer() {
        let raw = RawLayer {
            name: "peatland".to_string(),
            crs: "EPSG:3857".to_string(),
            features: vec![],
        };
        let err = ZoneLayer::build(&raw).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedCrs);
    }

    #[test]
    fn build_skips_and_reports_invalid_features() {
        let raw = RawLayer {
            name: "peatland".to_string(),
            crs: WGS84.to_string(),
            features: vec![
                RawFeature {
                    id: Some("ok".to_string()),
                    geometry: raw_square(0.0, 1.0),
                    attributes: Attributes::new(),
                },
                RawFeature {
                    id: Some("open".to_string()),
                    geometry: RawGeometry::Polygon(vec![vec![
                        [0.0, 0.0],
                        [0.0, 1.0],
                        [1.0, 1.0],
                        [1.0, 0.0],
                    ]]),
                    attributes: Attributes::new(),
                },
            ],
        };
        let (layer, rejected) = ZoneLayer::build(&raw).unwrap();
        assert_eq!(layer.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].identifier, "peatland/open");
        assert_eq!(rejected[0].kind, ErrorKind::MalformedPolygon);
    }

    #[test]
    fn store_swaps_layers_atomically() {
        let store = LayerStore::new();
        store.load(ZoneLayer::from_polygons("zones", vec![zone("a", square(0.0, 1.0), "A")]));
        let before = store.snapshot();

        let replaced = store.load(ZoneLayer::from_polygons(
            "zones",
            vec![
                zone("b", square(0.0, 1.0), "B"),
                zone("c", square(2.0, 3.0), "C"),
            ],
        ));
        assert_eq!(replaced.map(|l| l.len()), Some(1));

        assert_eq!(before.get("zones").map(|l| l.len()), Some(1));
        assert_eq!(store.get("zones").map(|l| l.len()), Some(2));
        assert_eq!(store.names(), vec!["zones".to_string()]);
    }

    #[test]
    fn store_query_candidates_spans_layers() {
        let store = LayerStore::new();
        store.load(ZoneLayer::from_polygons("peatland", vec![zone("p", square(0.0, 2.0), "P")]));
        store.load(ZoneLayer::from_polygons(
            "protected_areas",
            vec![zone("q", square(1.0, 3.0), "Q")],
        ));

        let found: Vec<(String, String)> = store
            .query_candidates(Point::new(1.5, 1.5))
            .into_iter()
            .map(|(layer, polygon)| (layer, polygon.id().to_string()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("peatland".to_string(), "p".to_string()),
                ("protected_areas".to_string(), "q".to_string())
            ]
        );

        assert!(store.remove("peatland").is_some());
        assert_eq!(store.query_candidates(Point::new(1.5, 1.5)).len(), 1);
    }
}
