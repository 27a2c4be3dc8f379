//! Platform-agnostic types for recorded GPS locations.
//!
//! This crate provides the data model shared by the store, the sync engine
//! and the command-line tool.
//!
//! # Features
//!
//! - Validated WGS84 coordinates and raw location fixes
//! - Records with store-assigned identity and pending placeholders
//! - Strict decoding of stored documents (behind the default `serde` feature)
//!
//! # Example
//!
//! ```
//! use gpslog_types::{Coordinate, Fix};
//!
//! let fix = Fix::now(35.681236, 139.767125)?;
//! assert!(Coordinate::new(fix.coordinate.latitude, fix.coordinate.longitude).is_ok());
//! # Ok::<(), gpslog_types::ValidationError>(())
//! ```

#[cfg(feature = "serde")]
pub mod document;
pub mod error;
pub mod types;

pub use error::{ValidationError, ValidationResult};
pub use types::{Coordinate, Fix, LocationRecord, RecordId, SubmissionId};
