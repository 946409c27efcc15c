//! Batch join of survey points against one layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use traceability_membership_models::{Attributes, SurveyPoint};

use crate::{StoreSnapshot, ZoneLayer, ZonePolygon};

/// The polygon a point matched within one layer.
#[derive(Debug, Clone)]
pub struct LayerMatch {
    polygon: Arc<ZonePolygon>,
}

impl LayerMatch {
    /// Identifier of the matched polygon.
    #[must_use]
    pub fn polygon_id(&self) -> &str {
        self.polygon.id()
    }

    /// Attribute bag of the matched polygon.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        self.polygon.attributes()
    }

    /// The matched polygon itself.
    #[must_use]
    pub const fn polygon(&self) -> &Arc<ZonePolygon> {
        &self.polygon
    }
}

/// Point id -> first matching polygon. Points outside the layer are absent.
pub type JoinResult = BTreeMap<String, LayerMatch>;

/// Joins `points` against `layer`.
///
/// When several polygons contain a point, the one loaded first wins. Points
/// are tested in parallel on the `rayon` pool; the result does not depend on
/// scheduling. Point ids are expected to be unique within `points`.
#[must_use]
pub fn join(points: &[SurveyPoint], layer: &ZoneLayer) -> JoinResult {
    if layer.is_empty() {
        return JoinResult::new();
    }

    points
        .par_iter()
        .filter_map(|point| {
            layer.first_match(point).map(|polygon| {
                (
                    point.id.clone(),
                    LayerMatch {
                        polygon: Arc::clone(polygon),
                    },
                )
            })
        })
        .collect()
}

/// Joins `points` against the layer called `name` in `snapshot`.
///
/// A layer that is not loaded behaves like an empty one.
#[must_use]
pub fn join_layer_by_name(
    snapshot: &StoreSnapshot,
    points: &[SurveyPoint],
    name: &str,
) -> JoinResult {
    snapshot
        .get(name)
        .map_or_else(JoinResult::new, |layer| join(points, layer))
}
