//! Alert lines for records found inside sensitive zones.

use std::fmt;

use serde::{Deserialize, Serialize};
use traceability_membership_models::Analysis;

/// Which layers raise alerts, and which polygon attribute labels them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRule {
    /// Layer whose memberships raise alerts.
    pub layer: String,
    /// Polygon attribute copied into [`Alert::label`].
    pub label_field: Option<String>,
}

/// A record that fell inside an alert-enabled layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Record that is inside the layer.
    pub record_id: String,
    /// Alert-enabled layer.
    pub layer: String,
    /// Id of the containing polygon.
    pub polygon_id: Option<String>,
    /// Value of the rule's label attribute on that polygon, if present.
    pub label: Option<String>,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record {} is in {}", self.record_id, self.layer)?;
        if let Some(label) = &self.label {
            write!(f, " ({label})")?;
        }
        Ok(())
    }
}

/// Collects one alert per (record, alert-enabled layer) membership.
///
/// Alerts are ordered by record in result order, then by rule order.
#[must_use]
pub fn collect_alerts(analysis: &Analysis, rules: &[AlertRule]) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for result in &analysis.results {
        for rule in rules {
            let Some(membership) = result.layer_memberships.get(&rule.layer) else {
                continue;
            };
            if !membership.member {
                continue;
            }

            let label = rule.label_field.as_ref().and_then(|field| {
                membership
                    .attributes
                    .as_ref()
                    .and_then(|attributes| attributes.get(field))
                    .and_then(label_text)
            });

            alerts.push(Alert {
                record_id: result.point_id.clone(),
                layer: rule.layer.clone(),
                polygon_id: membership.polygon_id.clone(),
                label,
            });
        }
    }

    alerts
}

fn label_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
