#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parsing of raw survey position strings.
//!
//! Survey tools export a plot location as a single whitespace-separated field
//! (`"<lat> <lon> <altitude> <accuracy>"` for a Kobo geopoint). Only the first
//! two tokens are read, always as latitude then longitude. The order is not
//! detected: a field written longitude-first parses without error as long as
//! both values pass the range checks.

use thiserror::Error;
use traceability_membership_models::{ErrorKind, RawRecord, SurveyPoint};

/// Errors produced while turning a positional string into coordinates.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    /// The record has no positional field at all.
    #[error("missing location field")]
    Missing,

    /// Fewer than two whitespace-separated tokens.
    #[error("expected at least 2 tokens, found {found}")]
    TooFewTokens {
        /// Number of tokens present.
        found: usize,
    },

    /// A token did not parse as a finite number.
    #[error("token '{token}' is not a finite number")]
    NotNumeric {
        /// The offending token.
        token: String,
    },

    /// Latitude outside `[-90, 90]`.
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    /// Longitude outside `[-180, 180]`.
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
}

impl CoordinateError {
    /// Maps this error onto the shared rejection category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Missing | Self::TooFewTokens { .. } | Self::NotNumeric { .. } => {
                ErrorKind::MalformedCoordinate
            }
            Self::LatitudeOutOfRange(_) | Self::LongitudeOutOfRange(_) => ErrorKind::OutOfRange,
        }
    }
}

/// Parses `"<lat> <lon> ..."` into a validated `(latitude, longitude)` pair.
///
/// Tokens after the second are ignored.
///
/// # Errors
///
/// Returns [`CoordinateError`] if fewer than two tokens are present, a token
/// is non-numeric, or the pair is outside the WGS84 range.
pub fn parse_position(raw: &str) -> Result<(f64, f64), CoordinateError> {
    let mut tokens = raw.split_whitespace();
    let (Some(lat_token), Some(lng_token)) = (tokens.next(), tokens.next()) else {
        return Err(CoordinateError::TooFewTokens {
            found: raw.split_whitespace().count(),
        });
    };

    let latitude = parse_token(lat_token)?;
    let longitude = parse_token(lng_token)?;
    validate_lat_lng(latitude, longitude)?;

    Ok((latitude, longitude))
}

fn parse_token(token: &str) -> Result<f64, CoordinateError> {
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CoordinateError::NotNumeric {
            token: token.to_string(),
        })
}

/// Checks a latitude/longitude pair against the WGS84 range.
///
/// Both bounds are inclusive.
///
/// # Errors
///
/// Returns [`CoordinateError::LatitudeOutOfRange`] or
/// [`CoordinateError::LongitudeOutOfRange`].
pub fn validate_lat_lng(latitude: f64, longitude: f64) -> Result<(), CoordinateError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(CoordinateError::LatitudeOutOfRange(latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(CoordinateError::LongitudeOutOfRange(longitude));
    }
    Ok(())
}

/// Parses a record's positional field into a [`SurveyPoint`].
///
/// # Errors
///
/// Returns [`CoordinateError::Missing`] if the record has no location, or
/// any error from [`parse_position`].
pub fn parse_record(record: &RawRecord) -> Result<SurveyPoint, CoordinateError> {
    let raw = record.location.as_deref().ok_or(CoordinateError::Missing)?;
    let (latitude, longitude) = parse_position(raw)?;

    Ok(SurveyPoint {
        id: record.id.clone(),
        latitude,
        longitude,
        attributes: record.attributes.clone(),
    })
}
