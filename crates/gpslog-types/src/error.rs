//! Error types for validating and decoding location data.

use thiserror::Error;

/// Errors that can occur when validating or decoding location data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// Latitude or longitude outside the WGS84 range, or not a finite number.
    #[error(
        "Invalid coordinate: latitude {latitude}, longitude {longitude} (expected -90..=90, -180..=180)"
    )]
    InvalidCoordinate {
        /// The rejected latitude.
        latitude: f64,
        /// The rejected longitude.
        longitude: f64,
    },

    /// A stored document could not be decoded into a record.
    #[error("Malformed record: field '{field}' {reason}")]
    MalformedRecord {
        /// Name of the offending document field.
        field: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl ValidationError {
    /// Shorthand for a [`ValidationError::MalformedRecord`].
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using gpslog-types' [`ValidationError`].
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
