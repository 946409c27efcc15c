#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Polygon layer sources.
//!
//! Reads `GeoJSON` files named by [`LayerDefinition`]s into [`RawLayer`]s
//! for the membership engine. Only `Polygon` and `MultiPolygon` features are
//! kept. Coordinates are passed through untouched; CRS handling and ring
//! validation happen in the engine.

use std::path::{Path, PathBuf};

use geojson::{Feature, GeoJson, feature::Id};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use traceability_membership_models::{
    ErrorKind, RawFeature, RawGeometry, RawLayer, RejectedInput, Ring, WGS84,
};

/// One `[[layers]]` entry of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDefinition {
    /// Layer name used in results (`protected_areas`, `peatland`, ...).
    pub name: String,
    /// `GeoJSON` file, relative to the configuration directory.
    pub path: PathBuf,
    /// Overrides the CRS declared in the file.
    #[serde(default)]
    pub crs: Option<String>,
    /// Polygon attribute used as the human label in alerts.
    #[serde(default)]
    pub label_field: Option<String>,
    /// Whether memberships in this layer raise alerts.
    #[serde(default = "default_alert")]
    pub alert: bool,
}

const fn default_alert() -> bool {
    true
}

/// Errors raised while reading a layer source.
#[derive(Debug, Error)]
pub enum LayerSourceError {
    /// The file could not be read.
    #[error("failed to read layer file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The document is not JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The document is JSON but not `GeoJSON`.
    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The document is a bare geometry rather than features.
    #[error("expected a FeatureCollection or Feature")]
    NotFeatures,
}

/// Why a single feature of an otherwise readable layer was dropped.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// The feature object is not valid `GeoJSON`.
    #[error("invalid feature: {0}")]
    Invalid(#[from] geojson::Error),

    /// A position has fewer than two ordinates.
    #[error("position with fewer than two ordinates")]
    Position,
}

impl FeatureError {
    /// Maps this error onto the shared rejection category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid(_) | Self::Position => ErrorKind::MalformedPolygon,
        }
    }
}

/// A layer read from its source, with the features that could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLayer {
    /// Polygon features in source order.
    pub layer: RawLayer,
    /// One rejection per unreadable feature, identified as `<layer>/<id or index>`.
    pub rejected: Vec<RejectedInput>,
}

/// Parses a `GeoJSON` document into a layer called `name`.
///
/// The CRS is `crs_override` if given, else the legacy `crs` member of the
/// document, else `EPSG:4326`. A feature that cannot be read is rejected on
/// its own and the rest of the layer is kept.
///
/// # Errors
///
/// * [`LayerSourceError::Json`] if the text is not JSON
/// * [`LayerSourceError::GeoJson`] if the document is not `GeoJSON`
/// * [`LayerSourceError::NotFeatures`] for a bare geometry document
pub fn parse_feature_collection(
    name: &str,
    crs_override: Option<&str>,
    text: &str,
) -> Result<ParsedLayer, LayerSourceError> {
    let mut document: serde_json::Value = serde_json::from_str(text)?;
    let foreign_crs = legacy_crs(&document);

    let features = match document.get("type").and_then(serde_json::Value::as_str) {
        Some("FeatureCollection") => match document.get_mut("features").map(serde_json::Value::take) {
            Some(serde_json::Value::Array(features)) => features,
            _ => {
                GeoJson::from_json_value(document)?;
                return Err(LayerSourceError::NotFeatures);
            }
        },
        Some("Feature") => vec![document],
        _ => {
            GeoJson::from_json_value(document)?;
            return Err(LayerSourceError::NotFeatures);
        }
    };

    let crs = crs_override
        .map(str::to_string)
        .or(foreign_crs)
        .unwrap_or_else(|| WGS84.to_string());

    let mut raw_features = Vec::with_capacity(features.len());
    let mut rejected = Vec::new();
    for (index, value) in features.into_iter().enumerate() {
        let identifier = feature_identifier(name, index, &value);
        match Feature::try_from(value)
            .map_err(FeatureError::from)
            .and_then(|feature| convert_feature(name, index, feature))
        {
            Ok(Some(raw)) => raw_features.push(raw),
            Ok(None) => {}
            Err(e) => {
                log::warn!("Rejected feature {identifier}: {e}");
                rejected.push(RejectedInput::new(identifier, e.kind(), e.to_string()));
            }
        }
    }

    log::debug!(
        "Layer '{name}': parsed {} polygon features, {} unreadable (crs {crs})",
        raw_features.len(),
        rejected.len()
    );

    Ok(ParsedLayer {
        layer: RawLayer {
            name: name.to_string(),
            crs,
            features: raw_features,
        },
        rejected,
    })
}

/// Reads the file named by `definition`, resolving relative paths against
/// `base_dir`.
///
/// # Errors
///
/// * [`LayerSourceError::Io`] if the file cannot be read
/// * Any error from [`parse_feature_collection`]
pub fn load_layer(
    definition: &LayerDefinition,
    base_dir: &Path,
) -> Result<ParsedLayer, LayerSourceError> {
    let path = base_dir.join(&definition.path);
    let text = std::fs::read_to_string(&path).map_err(|source| LayerSourceError::Io {
        path: path.clone(),
        source,
    })?;

    log::info!("Loading layer '{}' from {}", definition.name, path.display());
    parse_feature_collection(&definition.name, definition.crs.as_deref(), &text)
}

/// `{"type": "name", "properties": {"name": "EPSG:32650"}}`
fn legacy_crs(document: &serde_json::Value) -> Option<String> {
    document
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

/// `<layer>/<id>`, falling back to the feature's position in the source.
fn feature_identifier(layer: &str, index: usize, value: &serde_json::Value) -> String {
    match value.get("id") {
        Some(serde_json::Value::String(id)) => format!("{layer}/{id}"),
        Some(serde_json::Value::Number(id)) => format!("{layer}/{id}"),
        _ => format!("{layer}/{index}"),
    }
}

fn convert_feature(
    layer: &str,
    index: usize,
    feature: Feature,
) -> Result<Option<RawFeature>, FeatureError> {
    let Some(geometry) = feature.geometry else {
        log::debug!("Layer '{layer}': feature {index} has no geometry, skipping");
        return Ok(None);
    };

    let geometry = match &geometry.value {
        geojson::Value::Polygon(rings) => RawGeometry::Polygon(convert_rings(rings)?),
        geojson::Value::MultiPolygon(polygons) => RawGeometry::MultiPolygon(
            polygons
                .iter()
                .map(|rings| convert_rings(rings))
                .collect::<Result<_, _>>()?,
        ),
        _ => {
            log::debug!("Layer '{layer}': feature {index} is not a polygon, skipping");
            return Ok(None);
        }
    };

    let id = feature.id.map(|id| match id {
        Id::String(s) => s,
        Id::Number(n) => n.to_string(),
    });

    Ok(Some(RawFeature {
        id,
        geometry,
        attributes: feature
            .properties
            .map(|properties| properties.into_iter().collect())
            .unwrap_or_default(),
    }))
}

fn convert_rings(rings: &[Vec<geojson::Position>]) -> Result<Vec<Ring>, FeatureError> {
    rings
        .iter()
        .map(|ring| {
            ring.iter()
                .map(|position| match position.as_slice() {
                    [x, y, ..] => Ok([*x, *y]),
                    _ => Err(FeatureError::Position),
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROTECTED_AREAS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "id": "tn-01",
                "properties": { "NAMOBJ": "Taman Nasional Gunung Palung", "LUAS": 108000 },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[110.0, -1.0], [110.0, -1.5], [110.5, -1.5], [110.0, -1.0]]]
                }
            },
            {
                "type": "Feature",
                "id": 7,
                "properties": null,
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[0.0, 0.0], [0.0, 1.0, 12.5], [1.0, 1.0], [0.0, 0.0]]],
                        [[[5.0, 5.0], [5.0, 6.0], [6.0, 6.0], [5.0, 5.0]]]
                    ]
                }
            },
            {
                "type": "Feature",
                "properties": { "kind": "signpost" },
                "geometry": { "type": "Point", "coordinates": [110.2, -1.2] }
            },
            {
                "type": "Feature",
                "properties": {},
                "geometry": null
            }
        ]
    }"#;

    #[test]
    fn keeps_polygon_features_only() {
        let layer = parse_feature_collection("protected_areas", None, PROTECTED_AREAS)
            .unwrap()
            .layer;
        assert_eq!(layer.name, "protected_areas");
        assert_eq!(layer.crs, WGS84);
        assert_eq!(layer.features.len(), 2);
    }

    #[test]
    fn reads_ids_and_properties() {
        let layer = parse_feature_collection("protected_areas", None, PROTECTED_AREAS)
            .unwrap()
            .layer;
        assert_eq!(layer.features[0].id.as_deref(), Some("tn-01"));
        assert_eq!(layer.features[1].id.as_deref(), Some("7"));
        assert_eq!(
            layer.features[0]
                .attributes
                .get("NAMOBJ")
                .and_then(serde_json::Value::as_str),
            Some("Taman Nasional Gunung Palung")
        );
        assert!(layer.features[1].attributes.is_empty());
    }

    #[test]
    fn positions_keep_axis_order_and_drop_extra_ordinates() {
        let layer = parse_feature_collection("protected_areas", None, PROTECTED_AREAS)
            .unwrap()
            .layer;
        match &layer.features[0].geometry {
            RawGeometry::Polygon(rings) => assert_eq!(rings[0][1], [110.0, -1.5]),
            RawGeometry::MultiPolygon(_) => panic!("expected polygon"),
        }
        match &layer.features[1].geometry {
            RawGeometry::MultiPolygon(polygons) => {
                assert_eq!(polygons.len(), 2);
                assert_eq!(polygons[0][0][1], [0.0, 1.0]);
            }
            RawGeometry::Polygon(_) => panic!("expected multipolygon"),
        }
    }

    #[test]
    fn legacy_crs_member_is_detected() {
        let text = r#"{
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::32650" } },
            "features": []
        }"#;
        let layer = parse_feature_collection("peatland", None, text).unwrap().layer;
        assert_eq!(layer.crs, "urn:ogc:def:crs:EPSG::32650");
        assert!(layer.features.is_empty());

        let overridden = parse_feature_collection("peatland", Some("EPSG:3857"), text)
            .unwrap()
            .layer;
        assert_eq!(overridden.crs, "EPSG:3857");
    }

    #[test]
    fn single_feature_document_is_accepted() {
        let text = r#"{
            "type": "Feature",
            "properties": { "NAMA_KHG": "KHG Sungai Kapuas" },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [0.0, 0.0]]]
            }
        }"#;
        let layer = parse_feature_collection("peatland", None, text).unwrap().layer;
        assert_eq!(layer.features.len(), 1);
        assert!(layer.features[0].id.is_none());
    }

    #[test]
    fn bare_geometry_is_rejected() {
        let text = r#"{ "type": "Point", "coordinates": [1.0, 2.0] }"#;
        assert!(matches!(
            parse_feature_collection("peatland", None, text),
            Err(LayerSourceError::NotFeatures)
        ));
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(
            parse_feature_collection("peatland", None, "{ not geojson"),
            Err(LayerSourceError::Json(_))
        ));
        assert!(matches!(
            parse_feature_collection("peatland", None, r#"{ "type": "Zone" }"#),
            Err(LayerSourceError::GeoJson(_))
        ));
    }

    #[test]
    fn short_position_rejects_only_its_feature() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [0.0, 0.0]]]
                    }
                },
                {
                    "type": "Feature",
                    "properties": {},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[5.0], [5.0, 6.0], [6.0, 6.0], [5.0]]]
                    }
                }
            ]
        }"#;
        let parsed = parse_feature_collection("peatland", None, text).unwrap();
        assert_eq!(parsed.layer.features.len(), 1);
        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].identifier, "peatland/1");
        assert_eq!(parsed.rejected[0].kind, ErrorKind::MalformedPolygon);
    }

    #[test]
    fn unreadable_feature_is_rejected_by_id() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "id": "khg-9", "properties": {}, "geometry": { "type": "Polygon" } },
                {
                    "type": "Feature",
                    "id": "khg-10",
                    "properties": {},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [0.0, 0.0]]]
                    }
                }
            ]
        }"#;
        let parsed = parse_feature_collection("peatland", None, text).unwrap();
        assert_eq!(parsed.layer.features.len(), 1);
        assert_eq!(parsed.layer.features[0].id.as_deref(), Some("khg-10"));
        let ids: Vec<&str> = parsed.rejected.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["peatland/khg-9"]);
    }

    #[test]
    fn definition_defaults() {
        let definition: LayerDefinition = toml::from_str(
            r#"
            name = "peatland"
            path = "khg.geojson"
            "#,
        )
        .unwrap();
        assert!(definition.alert);
        assert!(definition.crs.is_none());
        assert!(definition.label_field.is_none());
    }

    #[test]
    fn missing_file_reports_path() {
        let definition = LayerDefinition {
            name: "peatland".to_string(),
            path: PathBuf::from("does-not-exist.geojson"),
            crs: None,
            label_field: None,
            alert: true,
        };
        let err = load_layer(&definition, Path::new("/nonexistent-dir")).unwrap_err();
        assert!(matches!(err, LayerSourceError::Io { .. }));
        assert!(err.to_string().contains("does-not-exist.geojson"));
    }
}
