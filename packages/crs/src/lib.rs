#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reprojection of polygon layers into geographic WGS84.
//!
//! Every layer entering the spatial store must be expressed in WGS84
//! degrees. [`normalize_layer`] is a pass-through for WGS84 input and runs
//! the inverse projection through `proj4rs` for the other supported systems
//! (Web Mercator and the 120 WGS84 UTM zones). Unknown identifiers fail with
//! [`CrsError::Unsupported`] rather than being guessed.

use std::fmt;

use proj4rs::Proj;
use thiserror::Error;
use traceability_membership_models::{ErrorKind, RawFeature, RawLayer, WGS84};

/// Geographic coordinates on the WGS84 datum.
const WGS84_LONGLAT: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Geographic coordinates on the Web Mercator sphere. Web Mercator treats
/// its spherical lon/lat as WGS84 degrees, so no datum shift is applied.
const MERCATOR_LONGLAT: &str = "+proj=longlat +a=6378137 +b=6378137 +no_defs";

const MERCATOR: &str =
    "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs";

/// Errors that can occur while resolving or applying a CRS.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrsError {
    /// The identifier does not name a supported reference system.
    #[error("unsupported CRS '{identifier}'")]
    Unsupported {
        /// Identifier as supplied by the layer source.
        identifier: String,
    },

    /// `proj4rs` refused the projection definition.
    #[error("cannot set up projection for {crs}: {reason}")]
    Projection {
        /// Canonical identifier of the source CRS.
        crs: String,
        /// Message reported by `proj4rs`.
        reason: String,
    },
}

impl CrsError {
    /// Maps this error onto the shared rejection category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported { .. } | Self::Projection { .. } => ErrorKind::UnsupportedCrs,
        }
    }
}

/// A supported coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Geographic WGS84 degrees (`EPSG:4326` / `OGC:CRS84`), lon/lat order.
    Wgs84,
    /// Spherical Web Mercator metres (`EPSG:3857`).
    WebMercator,
    /// WGS84 / UTM zone metres (`EPSG:326xx` north, `EPSG:327xx` south).
    Utm {
        /// Zone number, 1-60.
        zone: u8,
        /// Northern hemisphere when `true`.
        north: bool,
    },
}

impl Crs {
    /// Resolves a CRS identifier.
    ///
    /// Accepts `EPSG:<code>`, a bare `<code>`, OGC URNs
    /// (`urn:ogc:def:crs:EPSG::<code>`, `urn:ogc:def:crs:OGC:1.3:CRS84`) and
    /// the `WGS84`/`CRS84` aliases, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`CrsError::Unsupported`] for anything else.
    pub fn from_identifier(identifier: &str) -> Result<Self, CrsError> {
        let unsupported = || CrsError::Unsupported {
            identifier: identifier.to_string(),
        };

        let normalized = identifier.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "WGS84" | "WGS 84" | "CRS84" | "OGC:CRS84" | "URN:OGC:DEF:CRS:OGC:1.3:CRS84"
            | "URN:OGC:DEF:CRS:OGC::CRS84" => return Ok(Self::Wgs84),
            _ => {}
        }

        let code = epsg_code(&normalized).ok_or_else(unsupported)?;
        match code {
            4326 => Ok(Self::Wgs84),
            3857 | 3785 | 900_913 => Ok(Self::WebMercator),
            32601..=32660 => Ok(Self::Utm {
                zone: utm_zone(code - 32600),
                north: true,
            }),
            32701..=32760 => Ok(Self::Utm {
                zone: utm_zone(code - 32700),
                north: false,
            }),
            _ => Err(unsupported()),
        }
    }

    /// `(projected, geographic)` proj strings, or `None` for WGS84 itself.
    fn definitions(self) -> Option<(String, &'static str)> {
        match self {
            Self::Wgs84 => None,
            Self::WebMercator => Some((MERCATOR.to_string(), MERCATOR_LONGLAT)),
            Self::Utm { zone, north } => {
                let south = if north { "" } else { " +south" };
                Some((
                    format!("+proj=utm +zone={zone}{south} +datum=WGS84 +units=m +no_defs"),
                    WGS84_LONGLAT,
                ))
            }
        }
    }

    /// Builds the inverse projection into WGS84 degrees.
    ///
    /// Returns `None` for [`Crs::Wgs84`], which needs no conversion.
    ///
    /// # Errors
    ///
    /// Returns [`CrsError::Projection`] if `proj4rs` rejects the definition.
    pub fn reprojection(self) -> Result<Option<Reprojection>, CrsError> {
        let Some((projected, geographic)) = self.definitions() else {
            return Ok(None);
        };

        let build = |definition: &str| {
            Proj::from_proj_string(definition).map_err(|e| CrsError::Projection {
                crs: self.to_string(),
                reason: e.to_string(),
            })
        };

        Ok(Some(Reprojection {
            source: build(&projected)?,
            target: build(geographic)?,
        }))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wgs84 => f.write_str(WGS84),
            Self::WebMercator => f.write_str("EPSG:3857"),
            Self::Utm { zone, north: true } => write!(f, "EPSG:326{zone:02}"),
            Self::Utm { zone, north: false } => write!(f, "EPSG:327{zone:02}"),
        }
    }
}

/// A projected-to-geographic transformation, set up once per layer.
pub struct Reprojection {
    source: Proj,
    target: Proj,
}

impl Reprojection {
    /// Converts one `[x, y]` position in metres to `[lon, lat]` degrees.
    ///
    /// A position `proj4rs` cannot invert yields `NaN`s, which polygon
    /// validation rejects as non-finite.
    #[must_use]
    pub fn to_wgs84(&self, [x, y]: [f64; 2]) -> [f64; 2] {
        let mut point = (x, y, 0.0);
        match proj4rs::transform::transform(&self.source, &self.target, &mut point) {
            Ok(()) => [point.0.to_degrees(), point.1.to_degrees()],
            Err(_) => [f64::NAN, f64::NAN],
        }
    }
}

/// Extracts the numeric EPSG code from an upper-cased identifier.
fn epsg_code(normalized: &str) -> Option<u32> {
    let digits = normalized
        .strip_prefix("EPSG:")
        .or_else(|| normalized.strip_prefix("URN:OGC:DEF:CRS:EPSG::"))
        .or_else(|| {
            // URNs may carry a version: urn:ogc:def:crs:EPSG:6.6:4326
            normalized
                .strip_prefix("URN:OGC:DEF:CRS:EPSG:")
                .and_then(|rest| rest.rsplit(':').next())
        })
        .unwrap_or(normalized);

    digits.parse().ok()
}

#[allow(clippy::cast_possible_truncation)]
const fn utm_zone(offset: u32) -> u8 {
    offset as u8
}

/// Whether `identifier` names geographic WGS84.
#[must_use]
pub fn is_wgs84(identifier: &str) -> bool {
    matches!(Crs::from_identifier(identifier), Ok(Crs::Wgs84))
}

/// Produces an equivalent layer expressed in WGS84 degrees.
///
/// WGS84 input is copied unchanged apart from the CRS label, which is
/// canonicalized to `EPSG:4326`. The caller's layer is never mutated.
///
/// # Errors
///
/// * [`CrsError::Unsupported`] if the layer's CRS is not recognized
/// * [`CrsError::Projection`] if the projection cannot be set up
pub fn normalize_layer(layer: &RawLayer) -> Result<RawLayer, CrsError> {
    let crs = Crs::from_identifier(&layer.crs)?;

    let features = match crs.reprojection()? {
        None => layer.features.clone(),
        Some(reprojection) => {
            log::debug!(
                "Reprojecting layer '{}' ({} features) from {crs} to {WGS84}",
                layer.name,
                layer.features.len()
            );
            layer
                .features
                .iter()
                .map(|feature| RawFeature {
                    id: feature.id.clone(),
                    geometry: feature
                        .geometry
                        .map_positions(|p| reprojection.to_wgs84(p)),
                    attributes: feature.attributes.clone(),
                })
                .collect()
        }
    };

    Ok(RawLayer {
        name: layer.name.clone(),
        crs: WGS84.to_string(),
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use traceability_membership_models::{Attributes, RawGeometry};

    /// Half the Web Mercator world width in metres.
    const HALF_WORLD_M: f64 = 20_037_508.342_789_244;

    fn square_layer(crs: &str, half: f64) -> RawLayer {
        RawLayer {
            name: "zones".to_string(),
            crs: crs.to_string(),
            features: vec![RawFeature {
                id: Some("a".to_string()),
                geometry: RawGeometry::Polygon(vec![vec![
                    [-half, -half],
                    [-half, half],
                    [half, half],
                    [half, -half],
                    [-half, -half],
                ]]),
                attributes: Attributes::new(),
            }],
        }
    }

    fn inverse(identifier: &str, position: [f64; 2]) -> [f64; 2] {
        Crs::from_identifier(identifier)
            .unwrap()
            .reprojection()
            .unwrap()
            .unwrap()
            .to_wgs84(position)
    }

    #[test]
    fn resolves_wgs84_aliases() {
        for id in [
            "EPSG:4326",
            "epsg:4326",
            "4326",
            "WGS84",
            "OGC:CRS84",
            "urn:ogc:def:crs:OGC:1.3:CRS84",
            "urn:ogc:def:crs:EPSG::4326",
            "urn:ogc:def:crs:EPSG:6.6:4326",
        ] {
            assert_eq!(Crs::from_identifier(id).unwrap(), Crs::Wgs84, "{id}");
        }
    }

    #[test]
    fn resolves_projected_systems() {
        assert_eq!(Crs::from_identifier("EPSG:3857").unwrap(), Crs::WebMercator);
        assert_eq!(Crs::from_identifier("EPSG:900913").unwrap(), Crs::WebMercator);
        assert_eq!(
            Crs::from_identifier("EPSG:32748").unwrap(),
            Crs::Utm {
                zone: 48,
                north: false
            }
        );
        assert_eq!(
            Crs::from_identifier("urn:ogc:def:crs:EPSG::32650").unwrap(),
            Crs::Utm {
                zone: 50,
                north: true
            }
        );
    }

    #[test]
    fn rejects_unknown_identifiers() {
        for id in ["EPSG:23830", "EPSG:32600", "EPSG:32761", "ITM", ""] {
            let err = Crs::from_identifier(id).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnsupportedCrs, "{id}");
        }
    }

    #[test]
    fn display_round_trips_identifier() {
        for id in ["EPSG:4326", "EPSG:3857", "EPSG:32601", "EPSG:32760"] {
            assert_eq!(Crs::from_identifier(id).unwrap().to_string(), id);
        }
    }

    #[test]
    fn wgs84_needs_no_reprojection() {
        assert!(Crs::Wgs84.reprojection().unwrap().is_none());
    }

    #[test]
    fn mercator_origin_maps_to_null_island() {
        let [lon, lat] = inverse("EPSG:3857", [0.0, 0.0]);
        assert!(lon.abs() < 1e-9);
        assert!(lat.abs() < 1e-9);
    }

    #[test]
    fn mercator_world_edge_maps_to_antimeridian() {
        let [lon, lat] = inverse("EPSG:3857", [HALF_WORLD_M, HALF_WORLD_M]);
        assert!((lon.abs() - 180.0).abs() < 1e-7);
        assert!((lat - 85.051_128_779_806_6).abs() < 1e-7);
    }

    #[test]
    fn mercator_southern_hemisphere_is_negative() {
        let [lon, lat] = inverse("EPSG:3857", [-13_358_338.9, -283_882.0]);
        assert!(lon < -119.0 && lon > -121.0);
        assert!(lat < 0.0);
    }

    #[test]
    fn utm_false_origin_is_on_equator_and_central_meridian() {
        let [lon, lat] = inverse("EPSG:32648", [500_000.0, 0.0]);
        assert!((lon - 105.0).abs() < 1e-9);
        assert!(lat.abs() < 1e-9);
    }

    #[test]
    fn utm_eiffel_tower() {
        let [lon, lat] = inverse("EPSG:32631", [448_251.795, 5_411_932.678]);
        assert!((lon - 2.2945).abs() < 1e-5);
        assert!((lat - 48.8582).abs() < 1e-5);
    }

    #[test]
    fn utm_southern_hemisphere_uses_false_northing() {
        let [lon, lat] = inverse("EPSG:32749", [500_000.0, 9_723_700.0]);
        assert!((lon - 111.0).abs() < 1e-9);
        assert!((lat - -2.499_757).abs() < 1e-5);
    }

    #[test]
    fn utm_mid_latitude_on_central_meridian() {
        let [lon, lat] = inverse("EPSG:32633", [500_000.0, 5_000_000.0]);
        assert!((lon - 15.0).abs() < 1e-9);
        assert!((lat - 45.153_477).abs() < 1e-5);
    }

    #[test]
    fn wgs84_layer_passes_through_unchanged() {
        let layer = square_layer("OGC:CRS84", 1.0);
        let normalized = normalize_layer(&layer).unwrap();
        assert_eq!(normalized.crs, WGS84);
        assert_eq!(normalized.features, layer.features);
        assert_eq!(layer.crs, "OGC:CRS84");
    }

    #[test]
    fn mercator_layer_is_reprojected() {
        let layer = square_layer("EPSG:3857", 111_319.490_793_273_58);
        let normalized = normalize_layer(&layer).unwrap();
        let RawGeometry::Polygon(rings) = &normalized.features[0].geometry else {
            panic!("expected polygon");
        };
        let [lon, lat] = rings[0][2];
        assert!((lon - 1.0).abs() < 1e-9);
        assert!((lat - 0.999_949).abs() < 1e-5);
        assert_eq!(layer.crs, "EPSG:3857");
    }

    #[test]
    fn unsupported_layer_is_rejected() {
        let err = normalize_layer(&square_layer("EPSG:2157", 1.0)).unwrap_err();
        assert_eq!(
            err,
            CrsError::Unsupported {
                identifier: "EPSG:2157".to_string()
            }
        );
    }
}
