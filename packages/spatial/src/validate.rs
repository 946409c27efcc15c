//! Load-time validation of raw polygon rings.
//!
//! Rings must arrive closed and simple. Nothing is repaired: an open ring, a
//! ring with fewer than three distinct vertices, a vertex outside the WGS84
//! range, or a ring that crosses or touches itself rejects the whole feature.
//! Each ring is checked on its own; holes are not checked against the outer
//! ring.

use std::collections::BTreeSet;

use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Coord, Line, LineString, MultiPolygon, Polygon};
use rstar::{AABB, RTree, RTreeObject};
use thiserror::Error;
use traceability_membership_models::{ErrorKind, RawFeature};

use crate::ZonePolygon;

/// Why a polygon feature was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolygonError {
    /// A geometry without any member polygon.
    #[error("geometry has no polygons")]
    NoPolygons,

    /// A polygon without any ring.
    #[error("polygon {polygon} has no rings")]
    NoRings {
        /// Member polygon index.
        polygon: usize,
    },

    /// A ring shorter than a closed triangle.
    #[error("polygon {polygon} ring {ring} has {found} positions, need at least 4")]
    TooFewPositions {
        /// Member polygon index.
        polygon: usize,
        /// Ring index (0 = outer).
        ring: usize,
        /// Number of positions present.
        found: usize,
    },

    /// First and last positions differ.
    #[error("polygon {polygon} ring {ring} is not closed")]
    Unclosed {
        /// Member polygon index.
        polygon: usize,
        /// Ring index (0 = outer).
        ring: usize,
    },

    /// Fewer than three distinct vertices.
    #[error("polygon {polygon} ring {ring} is degenerate")]
    Degenerate {
        /// Member polygon index.
        polygon: usize,
        /// Ring index (0 = outer).
        ring: usize,
    },

    /// A vertex is `NaN` or infinite (typically a failed reprojection).
    #[error("polygon {polygon} ring {ring} has a non-finite vertex")]
    NonFinite {
        /// Member polygon index.
        polygon: usize,
        /// Ring index (0 = outer).
        ring: usize,
    },

    /// A vertex lies outside `[-180, 180] x [-90, 90]`.
    #[error("polygon {polygon} ring {ring} vertex ({x}, {y}) is outside the WGS84 range")]
    OutOfRange {
        /// Member polygon index.
        polygon: usize,
        /// Ring index (0 = outer).
        ring: usize,
        /// Longitude.
        x: f64,
        /// Latitude.
        y: f64,
    },

    /// Two edges of the ring cross, touch, or overlap.
    #[error("polygon {polygon} ring {ring} self-intersects near ({x}, {y})")]
    SelfIntersection {
        /// Member polygon index.
        polygon: usize,
        /// Ring index (0 = outer).
        ring: usize,
        /// Longitude of the intersection.
        x: f64,
        /// Latitude of the intersection.
        y: f64,
    },
}

impl PolygonError {
    /// Maps this error onto the shared rejection category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfRange { .. } => ErrorKind::OutOfRange,
            Self::NoPolygons
            | Self::NoRings { .. }
            | Self::TooFewPositions { .. }
            | Self::Unclosed { .. }
            | Self::Degenerate { .. }
            | Self::NonFinite { .. }
            | Self::SelfIntersection { .. } => ErrorKind::MalformedPolygon,
        }
    }
}

/// Validates a WGS84 feature and converts it into a [`ZonePolygon`].
///
/// `index` is the feature's position in the layer and becomes its load order
/// (and its id when the feature has none).
///
/// # Errors
///
/// Returns the first [`PolygonError`] found.
pub fn validate_feature(
    layer: &str,
    index: usize,
    feature: &RawFeature,
) -> Result<ZonePolygon, PolygonError> {
    let mut members = Vec::new();

    for (polygon_idx, rings) in feature.geometry.polygons().into_iter().enumerate() {
        let Some((exterior, holes)) = rings.split_first() else {
            return Err(PolygonError::NoRings {
                polygon: polygon_idx,
            });
        };

        let exterior = validate_ring(exterior, polygon_idx, 0)?;
        let interiors = holes
            .iter()
            .enumerate()
            .map(|(i, hole)| validate_ring(hole, polygon_idx, i + 1))
            .collect::<Result<Vec<_>, _>>()?;

        members.push(Polygon::new(exterior, interiors));
    }

    if members.is_empty() {
        return Err(PolygonError::NoPolygons);
    }

    let id = feature.id.clone().unwrap_or_else(|| index.to_string());

    Ok(ZonePolygon::new(
        layer,
        id,
        index,
        MultiPolygon(members),
        feature.attributes.clone(),
    ))
}

/// Checks one ring and converts it to a [`LineString`].
///
/// # Errors
///
/// Returns the first [`PolygonError`] found.
pub fn validate_ring(
    ring: &[[f64; 2]],
    polygon: usize,
    ring_idx: usize,
) -> Result<LineString<f64>, PolygonError> {
    if ring.len() < 4 {
        return Err(PolygonError::TooFewPositions {
            polygon,
            ring: ring_idx,
            found: ring.len(),
        });
    }

    for &[x, y] in ring {
        if !x.is_finite() || !y.is_finite() {
            return Err(PolygonError::NonFinite {
                polygon,
                ring: ring_idx,
            });
        }
        if !(-180.0..=180.0).contains(&x) || !(-90.0..=90.0).contains(&y) {
            return Err(PolygonError::OutOfRange {
                polygon,
                ring: ring_idx,
                x,
                y,
            });
        }
    }

    if ring.first() != ring.last() {
        return Err(PolygonError::Unclosed {
            polygon,
            ring: ring_idx,
        });
    }

    let distinct: BTreeSet<(u64, u64)> = ring
        .iter()
        .map(|[x, y]| (x.to_bits(), y.to_bits()))
        .collect();
    if distinct.len() < 3 {
        return Err(PolygonError::Degenerate {
            polygon,
            ring: ring_idx,
        });
    }

    let coords: Vec<Coord<f64>> = ring.iter().map(|&[x, y]| Coord { x, y }).collect();

    if let Some(at) = find_self_intersection(&coords) {
        return Err(PolygonError::SelfIntersection {
            polygon,
            ring: ring_idx,
            x: at.x,
            y: at.y,
        });
    }

    Ok(LineString::new(coords))
}

struct Segment {
    index: usize,
    line: Line<f64>,
}

impl RTreeObject for Segment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.line.start.x, self.line.start.y],
            [self.line.end.x, self.line.end.y],
        )
    }
}

/// Finds a point where two edges of a closed ring meet other than at their
/// shared vertex.
///
/// Repeated consecutive vertices are skipped so zero-length edges do not
/// count as touching. Candidate edge pairs come from an R-tree over edge
/// bounding boxes.
fn find_self_intersection(closed: &[Coord<f64>]) -> Option<Coord<f64>> {
    let mut vertices: Vec<Coord<f64>> = Vec::with_capacity(closed.len());
    for &c in closed {
        if vertices.last() != Some(&c) {
            vertices.push(c);
        }
    }

    let segments: Vec<Segment> = vertices
        .windows(2)
        .enumerate()
        .map(|(index, pair)| Segment {
            index,
            line: Line::new(pair[0], pair[1]),
        })
        .collect();
    let count = segments.len();

    let adjacent = |i: usize, j: usize| j == i + 1 || (i == 0 && j == count - 1);

    let tree = RTree::bulk_load(segments);

    for segment in tree.iter() {
        for other in tree.locate_in_envelope_intersecting(&segment.envelope()) {
            let (i, j) = (segment.index, other.index);
            if j <= i {
                continue;
            }

            match line_intersection(segment.line, other.line) {
                None => {}
                Some(LineIntersection::SinglePoint { .. }) if adjacent(i, j) => {}
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    return Some(intersection);
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    return Some(intersection.start);
                }
            }
        }
    }

    None
}
