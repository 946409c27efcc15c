//! Per-record aggregation of layer join results.

use std::collections::BTreeMap;

use traceability_membership_models::{LayerMembership, MembershipResult, SurveyPoint};
use traceability_spatial::JoinResult;

/// Merges one join result per configured layer into a [`MembershipResult`].
///
/// Every configured layer gets an entry; layers the point is outside of are
/// recorded as non-members. No layers yields an empty mapping.
#[must_use]
pub fn classify(
    point: &SurveyPoint,
    per_layer_results: &[(&str, &JoinResult)],
) -> MembershipResult {
    let layer_memberships = per_layer_results
        .iter()
        .map(|(layer, result)| {
            let membership = result.get(&point.id).map_or_else(LayerMembership::outside, |m| {
                LayerMembership {
                    member: true,
                    polygon_id: Some(m.polygon_id().to_string()),
                    attributes: Some(m.attributes().clone()),
                }
            });
            ((*layer).to_string(), membership)
        })
        .collect::<BTreeMap<_, _>>();

    MembershipResult {
        point_id: point.id.clone(),
        layer_memberships,
    }
}
