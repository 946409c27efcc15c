//! Exact point-in-polygon test.
//!
//! Built on `geo`'s coordinate-position classification, which uses robust
//! orientation predicates and no snapping tolerance. Boundary policy is
//! inclusive: a point lying exactly on an edge or vertex of any ring (outer
//! or hole) is contained.

use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::{Coord, Intersects, MultiPolygon, Point, Polygon};
use traceability_membership_models::SurveyPoint;

/// Converts a survey point into a `geo` point (`x` = longitude).
#[must_use]
pub fn point_of(point: &SurveyPoint) -> Point<f64> {
    Point::new(point.longitude, point.latitude)
}

/// Where `p` lies relative to `polygon`: inside, on a ring, or outside.
#[must_use]
pub fn position(p: Coord<f64>, polygon: &MultiPolygon<f64>) -> CoordPos {
    polygon.coordinate_position(&p)
}

/// Outer ring minus holes, boundaries included.
#[must_use]
pub fn polygon_contains(p: Coord<f64>, polygon: &Polygon<f64>) -> bool {
    polygon.intersects(&p)
}

/// Whether any member polygon of `polygon` contains `point`.
#[must_use]
pub fn contains(point: Point<f64>, polygon: &MultiPolygon<f64>) -> bool {
    polygon.intersects(&point)
}
