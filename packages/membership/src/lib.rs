#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Sensitive-zone membership engine.
//!
//! Takes raw survey records and raw polygon layers, and answers for every
//! record which layers (peatland, protected areas, ...) its plot location
//! falls inside. Bad records, bad polygons and unsupported layers are
//! reported next to the results instead of failing the batch.
//!
//! [`analyze`] is the stateless entry point. [`Engine`] keeps layers loaded
//! across batches and supports replacing a layer while other threads keep
//! analyzing against the previous version.

pub mod alerts;
pub mod classify;
pub mod progress;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use traceability_membership_models::{
    Analysis, ErrorKind, RawLayer, RawRecord, RejectedInput, SurveyPoint,
};
use traceability_spatial::{JoinResult, LayerStore, ZoneLayer, join};

pub use classify::classify;
pub use progress::{NullProgress, ProgressCallback};

/// Analyzes one batch of records against a set of layers.
///
/// Builds a private layer store, so the outcome depends only on the inputs.
#[must_use]
pub fn analyze(records: &[RawRecord], layers: &[RawLayer]) -> Analysis {
    let engine = Engine::new();
    for layer in layers {
        engine.load_layer(layer);
    }
    engine.analyze(records)
}

/// Long-lived engine owning the layer store.
#[derive(Default)]
pub struct Engine {
    store: LayerStore,
    /// Rejections from the most recent load of each layer name, in first-load
    /// order. Its write lock is held while a load publishes to `store`.
    load_errors: RwLock<Vec<(String, Vec<RejectedInput>)>>,
}

impl Engine {
    /// Creates an engine with no layers loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying layer store.
    #[must_use]
    pub const fn store(&self) -> &LayerStore {
        &self.store
    }

    /// Normalizes, validates, and publishes a layer.
    ///
    /// Replaces any layer with the same name. If the layer cannot be loaded
    /// at all (unsupported CRS) it is removed from the store, so no join
    /// runs against stale polygons. Returns the rejections of this load;
    /// they are also reported by every later [`Engine::analyze`] until the
    /// layer is loaded again.
    pub fn load_layer(&self, raw: &RawLayer) -> Vec<RejectedInput> {
        self.load_layer_with_source_errors(raw, Vec::new())
    }

    /// Like [`Engine::load_layer`] for a layer whose source already dropped
    /// some features. `source_errors` are reported ahead of the polygons
    /// rejected here, unless the whole layer is excluded.
    pub fn load_layer_with_source_errors(
        &self,
        raw: &RawLayer,
        source_errors: Vec<RejectedInput>,
    ) -> Vec<RejectedInput> {
        let built = traceability_crs::normalize_layer(raw)
            .map_err(|e| RejectedInput::new(&raw.name, e.kind(), e.to_string()))
            .and_then(|normalized| {
                ZoneLayer::build(&normalized)
                    .map_err(|e| RejectedInput::new(&raw.name, e.kind(), e.to_string()))
            });

        // Held across the store swap so analyses see a layer and its errors together.
        let mut load_errors = self
            .load_errors
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let rejected = match built {
            Ok((layer, polygon_errors)) => {
                let mut rejected = source_errors;
                rejected.extend(polygon_errors);
                if !rejected.is_empty() {
                    log::warn!(
                        "Layer '{}': {} polygons rejected, {} kept",
                        raw.name,
                        rejected.len(),
                        layer.len()
                    );
                }
                self.store.load(layer);
                rejected
            }
            Err(rejection) => {
                log::error!("Layer '{}' excluded: {}", raw.name, rejection.detail);
                self.store.remove(&raw.name);
                vec![rejection]
            }
        };

        match load_errors.iter_mut().find(|(name, _)| *name == raw.name) {
            Some((_, previous)) => previous.clone_from(&rejected),
            None => load_errors.push((raw.name.clone(), rejected.clone())),
        }

        rejected
    }

    /// Analyzes a record batch against the currently loaded layers.
    #[must_use]
    pub fn analyze(&self, records: &[RawRecord]) -> Analysis {
        self.analyze_with_progress(records, &NullProgress)
    }

    /// Like [`Engine::analyze`], reporting one progress unit per layer joined.
    #[must_use]
    pub fn analyze_with_progress(
        &self,
        records: &[RawRecord],
        progress: &dyn ProgressCallback,
    ) -> Analysis {
        // Taken once so a concurrent reload cannot change layers mid-batch.
        let (snapshot, mut errors) = {
            let load_errors = self.load_errors.read().unwrap_or_else(PoisonError::into_inner);
            let errors: Vec<RejectedInput> = load_errors
                .iter()
                .flat_map(|(_, rejected)| rejected.iter().cloned())
                .collect();
            (self.store.snapshot(), errors)
        };

        let (points, record_errors) = parse_records(records);

        progress.set_total(snapshot.len() as u64);
        let joined: Vec<(&str, JoinResult)> = snapshot
            .layers()
            .map(|layer| {
                progress.set_message(format!("Joining {}", layer.name()));
                let result = join(&points, layer);
                log::debug!(
                    "Layer '{}': {} of {} points inside",
                    layer.name(),
                    result.len(),
                    points.len()
                );
                progress.inc(1);
                (layer.name(), result)
            })
            .collect();
        let per_layer: Vec<(&str, &JoinResult)> =
            joined.iter().map(|(name, result)| (*name, result)).collect();

        let results = points
            .iter()
            .map(|point| classify(point, &per_layer))
            .collect::<Vec<_>>();

        progress.finish(format!(
            "Analyzed {} records against {} layers",
            results.len(),
            snapshot.len()
        ));
        log::info!(
            "Analyzed {} records ({} rejected) against {} layers",
            results.len(),
            record_errors.len(),
            snapshot.len()
        );

        errors.extend(record_errors);
        Analysis { results, errors }
    }
}

/// Parses every record's position, collecting the failures.
///
/// A record whose id was already seen in this batch is rejected as
/// [`ErrorKind::DuplicateId`]; the first occurrence is kept.
#[must_use]
pub fn parse_records(records: &[RawRecord]) -> (Vec<SurveyPoint>, Vec<RejectedInput>) {
    let mut points = Vec::with_capacity(records.len());
    let mut errors = Vec::new();
    let mut seen = BTreeSet::new();

    for record in records {
        if !seen.insert(record.id.as_str()) {
            log::warn!("Rejected record {}: duplicate identifier", record.id);
            errors.push(RejectedInput::new(
                &record.id,
                ErrorKind::DuplicateId,
                "identifier already used by an earlier record",
            ));
            continue;
        }

        match traceability_coordinates::parse_record(record) {
            Ok(point) => points.push(point),
            Err(e) => {
                log::warn!("Rejected record {}: {e}", record.id);
                errors.push(RejectedInput::new(&record.id, e.kind(), e.to_string()));
            }
        }
    }

    (points, errors)
}

/// Counts derived from an [`Analysis`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Records that produced a result.
    pub analyzed: usize,
    /// Rejected records, polygons, and layers.
    pub rejected: usize,
    /// Layer name -> number of records inside it.
    pub members_per_layer: BTreeMap<String, usize>,
}

/// Summarizes an analysis.
#[must_use]
pub fn summarize(analysis: &Analysis) -> Summary {
    let mut members_per_layer = BTreeMap::new();
    for result in &analysis.results {
        for (layer, membership) in &result.layer_memberships {
            let count = members_per_layer.entry(layer.clone()).or_insert(0);
            if membership.member {
                *count += 1;
            }
        }
    }

    Summary {
        analyzed: analysis.results.len(),
        rejected: analysis.errors.len(),
        members_per_layer,
    }
}
