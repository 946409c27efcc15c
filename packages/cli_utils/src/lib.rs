#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal helpers for the `traceability` binary.
//!
//! [`init_logger`] installs `pretty_env_logger` behind `indicatif-log-bridge`
//! so log lines printed during an analysis do not tear the progress bars.
//! [`IndicatifProgress`] renders the engine's [`ProgressCallback`].

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use traceability_membership::ProgressCallback;

pub use indicatif::MultiProgress;

/// Log filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// An `indicatif` [`ProgressBar`] driven by the membership engine.
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Applied once the number of layers is known.
    bar_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Spinner that turns into a `layers joined` bar on
    /// [`ProgressCallback::set_total`].
    #[must_use]
    pub fn layers_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        Arc::new(Self::new(bar))
    }

    /// Spinner for steps with no measurable total, such as reading files.
    #[must_use]
    pub fn spinner(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());
        let bar_style = bar.style();

        Arc::new(Self { bar, bar_style })
    }

    fn new(bar: ProgressBar) -> Self {
        let bar_style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.green/dim} {pos}/{len} layers [{elapsed_precise}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Self { bar, bar_style }
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.bar_style.clone());
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Installs the global logger and returns the [`MultiProgress`] every bar
/// must be added to.
///
/// Verbosity comes from `RUST_LOG`, defaulting to [`DEFAULT_LOG_FILTER`].
/// Calling this twice keeps the first logger.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
    let logger = pretty_env_logger::formatted_builder()
        .parse_filters(&filter)
        .build();
    let level = logger.filter();

    if indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .is_ok()
    {
        log::set_max_level(level);
    }

    multi
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_switches_bar_to_counted_style() {
        let progress = IndicatifProgress::new(ProgressBar::hidden());
        progress.set_total(3);
        progress.inc(1);
        progress.inc(1);
        assert_eq!(progress.bar.length(), Some(3));
        assert_eq!(progress.bar.position(), 2);

        progress.finish("done".to_string());
        assert!(progress.bar.is_finished());
    }
}
