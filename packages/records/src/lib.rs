#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Survey record sources.
//!
//! Turns exported survey submissions into [`RawRecord`]s. Two formats are
//! read:
//!
//! * JSON: a top-level array of submission objects, or the Kobo API
//!   `data.json` shape `{"count": .., "results": [..]}`
//! * CSV with a header row, every cell kept as a string attribute
//!
//! The positional string is extracted verbatim; parsing it is the engine's
//! job, so a malformed location still produces a record.

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;
use traceability_membership_models::{Attributes, RawRecord};

/// Fallback identifier field of Kobo submissions.
pub const KOBO_ID_FIELD: &str = "_id";

/// File format of a record source.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RecordFormat {
    Json,
    Csv,
}

/// The `[records]` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSource {
    /// Export file, relative to the configuration directory.
    pub path: PathBuf,
    /// Inferred from the file extension when absent.
    #[serde(default)]
    pub format: Option<RecordFormat>,
    /// Field holding the record identifier.
    #[serde(default)]
    pub id_field: Option<String>,
    /// Field holding the `"<lat> <lon> [alt] [accuracy]"` string.
    pub location_field: String,
}

impl RecordSource {
    /// The configured format, or the one implied by the file extension.
    ///
    /// # Errors
    ///
    /// * [`RecordSourceError::UnknownFormat`] if neither is available
    pub fn resolved_format(&self) -> Result<RecordFormat, RecordSourceError> {
        if let Some(format) = self.format {
            return Ok(format);
        }

        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
            .ok_or_else(|| RecordSourceError::UnknownFormat {
                path: self.path.clone(),
            })
    }
}

/// Errors raised while reading a record source.
#[derive(Debug, Error)]
pub enum RecordSourceError {
    /// The file could not be read.
    #[error("failed to read records file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Format not configured and not implied by the extension.
    #[error("cannot infer record format of {path}; set `format` to json or csv")]
    UnknownFormat {
        /// Export file without a usable extension.
        path: PathBuf,
    },

    /// Invalid JSON document.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid CSV document.
    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    /// JSON document is neither an array nor an object with `results`.
    #[error("expected an array of records or an object with a `results` array")]
    NotRecords,

    /// A JSON record that is not an object.
    #[error("record {row} is not a JSON object")]
    NotAnObject {
        /// 1-based position in the document.
        row: usize,
    },
}

/// Reads the records named by `source`, resolving relative paths against
/// `base_dir`.
///
/// # Errors
///
/// * [`RecordSourceError::Io`] if the file cannot be opened
/// * [`RecordSourceError::UnknownFormat`] if the format cannot be determined
/// * Any error from [`from_json_str`] or [`from_csv_reader`]
pub fn load_records(
    source: &RecordSource,
    base_dir: &Path,
) -> Result<Vec<RawRecord>, RecordSourceError> {
    let path = base_dir.join(&source.path);
    let format = source.resolved_format()?;
    let io_error = |e| RecordSourceError::Io {
        path: path.clone(),
        source: e,
    };

    log::info!("Reading {format} records from {}", path.display());

    let records = match format {
        RecordFormat::Json => {
            let text = std::fs::read_to_string(&path).map_err(io_error)?;
            from_json_str(&text, source)?
        }
        RecordFormat::Csv => {
            let file = std::fs::File::open(&path).map_err(io_error)?;
            from_csv_reader(file, source)?
        }
    };

    log::info!("Read {} records", records.len());
    Ok(records)
}

/// Parses a JSON export.
///
/// # Errors
///
/// * [`RecordSourceError::Json`] if the text is not JSON
/// * [`RecordSourceError::NotRecords`] for an unexpected document shape
/// * [`RecordSourceError::NotAnObject`] for a non-object entry
pub fn from_json_str(
    text: &str,
    source: &RecordSource,
) -> Result<Vec<RawRecord>, RecordSourceError> {
    let document: serde_json::Value = serde_json::from_str(text)?;

    let entries = match document {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(mut object) => match object.remove("results") {
            Some(serde_json::Value::Array(entries)) => entries,
            _ => return Err(RecordSourceError::NotRecords),
        },
        _ => return Err(RecordSourceError::NotRecords),
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            serde_json::Value::Object(object) => {
                Ok(build_record(index + 1, object.into_iter().collect(), source))
            }
            _ => Err(RecordSourceError::NotAnObject { row: index + 1 }),
        })
        .collect()
}

/// Parses a CSV export with a header row.
///
/// # Errors
///
/// * [`RecordSourceError::Csv`] if a row cannot be read
pub fn from_csv_reader<R: Read>(
    reader: R,
    source: &RecordSource,
) -> Result<Vec<RawRecord>, RecordSourceError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = reader.headers()?.clone();

    reader
        .records()
        .enumerate()
        .map(|(index, row)| {
            let row = row?;
            let attributes = headers
                .iter()
                .zip(row.iter())
                .map(|(header, cell)| {
                    (
                        header.to_string(),
                        serde_json::Value::String(cell.to_string()),
                    )
                })
                .collect::<Attributes>();
            Ok(build_record(index + 1, attributes, source))
        })
        .collect()
}

fn build_record(row: usize, attributes: Attributes, source: &RecordSource) -> RawRecord {
    let id = source
        .id_field
        .as_deref()
        .and_then(|field| attributes.get(field))
        .and_then(identifier_text)
        .or_else(|| attributes.get(KOBO_ID_FIELD).and_then(identifier_text))
        .unwrap_or_else(|| {
            log::debug!("Record at row {row} has no identifier, using row number");
            format!("row-{row}")
        });

    let location = match attributes.get(&source.location_field) {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    RawRecord {
        id,
        location,
        attributes,
    }
}

fn identifier_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
