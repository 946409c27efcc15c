#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the sensitive-zone membership engine.
//!
//! Reads a `traceability.toml` naming one survey export and any number of
//! `GeoJSON` zone layers, then reports which records fall inside which
//! zones. Uses `indicatif-log-bridge` (via
//! [`traceability_cli_utils::init_logger`]) so log lines and progress bars
//! share the terminal.

mod config;

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde::Serialize;
use traceability_cli_utils::{IndicatifProgress, MultiProgress};
use traceability_membership::alerts::{Alert, collect_alerts};
use traceability_membership::{Engine, ProgressCallback as _, Summary, summarize};
use traceability_membership_models::{Attributes, MembershipResult, RawRecord, RejectedInput};

use crate::config::{Config, DEFAULT_CONFIG};

#[derive(Parser)]
#[command(
    name = "traceability",
    about = "Checks survey plot locations against sensitive-zone layers"
)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze every configured record against every configured layer
    Analyze {
        /// Write the JSON report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load and validate the configured layers
    Layers,
    /// Check a single raw position (e.g. "-1.2345 110.1234 12 5")
    Check {
        /// Positional string in `<lat> <lon> [alt] [accuracy]` form
        #[arg(allow_hyphen_values = true)]
        position: String,
    },
}

/// JSON report written by `analyze`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    results: &'a [MembershipResult],
    errors: &'a [RejectedInput],
    alerts: &'a [Alert],
    summary: &'a Summary,
}

/// One row of the `layers` listing.
struct LayerStatus {
    name: String,
    crs: String,
    polygons: usize,
    rejected: Vec<RejectedInput>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = traceability_cli_utils::init_logger();
    let cli = Cli::parse();
    let (config, base_dir) = Config::load(&cli.config)?;

    match cli.command {
        Commands::Analyze { output } => analyze(&multi, &config, &base_dir, output.as_deref())?,
        Commands::Layers => {
            let engine = Engine::new();
            let statuses = load_layers(&multi, &engine, &config, &base_dir)?;

            println!("{:<24} {:<28} {:>9} {:>9}", "LAYER", "CRS", "POLYGONS", "REJECTED");
            println!("{}", "-".repeat(73));
            for status in &statuses {
                println!(
                    "{:<24} {:<28} {:>9} {:>9}",
                    status.name,
                    status.crs,
                    status.polygons,
                    status.rejected.len()
                );
            }
            for rejected in statuses.iter().flat_map(|s| &s.rejected) {
                println!("  {} [{}] {}", rejected.identifier, rejected.kind, rejected.detail);
            }
        }
        Commands::Check { position } => {
            let engine = Engine::new();
            load_layers(&multi, &engine, &config, &base_dir)?;
            check(&engine, &position);
        }
    }

    Ok(())
}

fn analyze(
    multi: &MultiProgress,
    config: &Config,
    base_dir: &Path,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    let engine = Engine::new();
    load_layers(multi, &engine, config, base_dir)?;

    let reading = IndicatifProgress::spinner(multi, "Reading records");
    let records = traceability_records::load_records(&config.records, base_dir)?;
    reading.finish(format!("Read {} records", records.len()));

    let progress = IndicatifProgress::layers_bar(multi, "Joining layers");
    let analysis = engine.analyze_with_progress(&records, progress.as_ref());

    let alerts = collect_alerts(&analysis, &config.alert_rules());
    for alert in &alerts {
        log::warn!("{alert}");
    }

    let summary = summarize(&analysis);
    for (layer, members) in &summary.members_per_layer {
        log::info!("{layer}: {members} of {} records inside", summary.analyzed);
    }
    log::info!(
        "{} records analyzed, {} inputs rejected, {} alerts in {:.1}s",
        summary.analyzed,
        summary.rejected,
        alerts.len(),
        start.elapsed().as_secs_f64()
    );

    let report = Report {
        results: &analysis.results,
        errors: &analysis.errors,
        alerts: &alerts,
        summary: &summary,
    };

    if let Some(path) = output {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &report)?;
        log::info!("Report written to {}", path.display());
    } else {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, &report)?;
        writeln!(handle)?;
    }

    Ok(())
}

/// Reads every configured layer file and loads it into `engine`.
///
/// Unreadable or invalid files abort. Anything rejected inside a readable
/// file is returned in the statuses and logged.
fn load_layers(
    multi: &MultiProgress,
    engine: &Engine,
    config: &Config,
    base_dir: &Path,
) -> Result<Vec<LayerStatus>, Box<dyn std::error::Error>> {
    let progress = IndicatifProgress::spinner(multi, "Loading layers");
    let mut statuses = Vec::with_capacity(config.layers.len());

    for definition in &config.layers {
        progress.set_message(format!("Loading {}", definition.name));
        let parsed = traceability_layers::load_layer(definition, base_dir)?;
        let raw = parsed.layer;
        let rejected = engine.load_layer_with_source_errors(&raw, parsed.rejected);
        let polygons = engine
            .store()
            .get(&raw.name)
            .map_or(0, |layer| layer.len());

        statuses.push(LayerStatus {
            name: raw.name,
            crs: raw.crs,
            polygons,
            rejected,
        });
    }

    progress.finish(format!("Loaded {} layers", statuses.len()));
    Ok(statuses)
}

fn check(engine: &Engine, position: &str) {
    let record = RawRecord {
        id: "position".to_string(),
        location: Some(position.to_string()),
        attributes: Attributes::new(),
    };
    let analysis = engine.analyze(&[record]);

    for error in &analysis.errors {
        println!("{} [{}] {}", error.identifier, error.kind, error.detail);
    }

    let Some(result) = analysis.results.first() else {
        return;
    };
    for (layer, membership) in &result.layer_memberships {
        match &membership.polygon_id {
            Some(polygon) if membership.member => println!("{layer:<24} inside {polygon}"),
            _ => println!("{layer:<24} outside"),
        }
    }
}
