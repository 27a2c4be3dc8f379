//! Error types for gpslog-store.

use std::path::PathBuf;

use gpslog_types::{RecordId, ValidationError};

/// Result type for gpslog-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in gpslog-store.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Coordinate outside WGS84 bounds; nothing was written.
    #[error("Invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    /// The store could not be reached (connectivity or auth failure).
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// No record with this id exists.
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    /// A realtime subscription is already active on this store.
    #[error("A subscription is already active")]
    AlreadySubscribed,

    /// A stored document could not be decoded.
    #[error("Malformed record: field '{field}' {reason}")]
    MalformedRecord { field: String, reason: String },

    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The database was written by a newer version of gpslog.
    #[error("Database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i32, supported: i32 },

    /// The write was abandoned before the store acknowledged it.
    #[error("Write cancelled before acknowledgement")]
    Cancelled,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::Io(_))
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidCoordinate {
                latitude,
                longitude,
            } => Error::InvalidCoordinate {
                latitude,
                longitude,
            },
            ValidationError::MalformedRecord { field, reason } => {
                Error::MalformedRecord { field, reason }
            }
            other => Error::MalformedRecord {
                field: String::new(),
                reason: other.to_string(),
            },
        }
    }
}
