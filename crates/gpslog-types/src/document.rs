//! Strict decoding of stored location documents.
//!
//! Remote documents have the shape
//!
//! ```json
//! { "latitude": 35.68, "longitude": 139.76, "createdAt": "2024-01-01T10:00:00Z" }
//! ```
//!
//! `createdAt` may also be an integer number of unix seconds. Every field is
//! required; a missing or mistyped field is a [`ValidationError::MalformedRecord`]
//! rather than a silent zero.

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{ValidationError, ValidationResult};
use crate::types::{Coordinate, LocationRecord, RecordId};

/// Document field holding the latitude.
pub const FIELD_LATITUDE: &str = "latitude";
/// Document field holding the longitude.
pub const FIELD_LONGITUDE: &str = "longitude";
/// Document field holding the creation timestamp.
pub const FIELD_CREATED_AT: &str = "createdAt";

impl LocationRecord {
    /// Decode a stored document into an acknowledged record.
    ///
    /// # Examples
    ///
    /// ```
    /// use gpslog_types::{LocationRecord, RecordId};
    ///
    /// let doc = serde_json::json!({
    ///     "latitude": 35.5,
    ///     "longitude": 139.25,
    ///     "createdAt": "2024-01-01T10:00:00Z",
    /// });
    /// let record = LocationRecord::from_document(RecordId::new("abc"), doc.as_object().unwrap()).unwrap();
    /// assert_eq!(record.latitude, 35.5);
    ///
    /// let missing = serde_json::json!({ "latitude": 35.5 });
    /// assert!(LocationRecord::from_document(RecordId::new("abc"), missing.as_object().unwrap()).is_err());
    /// ```
    pub fn from_document(id: RecordId, document: &Map<String, Value>) -> ValidationResult<Self> {
        let latitude = number_field(document, FIELD_LATITUDE)?;
        let longitude = number_field(document, FIELD_LONGITUDE)?;
        let created_at = timestamp_field(document, FIELD_CREATED_AT)?;

        Coordinate::new(latitude, longitude)?;

        Ok(Self {
            id: Some(id),
            latitude,
            longitude,
            created_at,
            sequence: None,
            submission: None,
        })
    }

    /// Encode the record as a stored document.
    #[must_use]
    pub fn to_document(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(FIELD_LATITUDE.to_string(), Value::from(self.latitude));
        map.insert(FIELD_LONGITUDE.to_string(), Value::from(self.longitude));
        // RFC 3339 formatting only fails for years outside 0..=9999
        let created_at = self
            .created_at
            .format(&Rfc3339)
            .map(Value::String)
            .unwrap_or_else(|_| Value::from(self.created_at.unix_timestamp()));
        map.insert(FIELD_CREATED_AT.to_string(), created_at);
        map
    }
}

fn number_field(document: &Map<String, Value>, field: &str) -> ValidationResult<f64> {
    match document.get(field) {
        None | Some(Value::Null) => Err(ValidationError::malformed(field, "is missing")),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ValidationError::malformed(field, "is not representable as f64")),
        Some(other) => Err(ValidationError::malformed(
            field,
            format!("expected a number, got {}", type_name(other)),
        )),
    }
}

fn timestamp_field(document: &Map<String, Value>, field: &str) -> ValidationResult<OffsetDateTime> {
    match document.get(field) {
        None | Some(Value::Null) => Err(ValidationError::malformed(field, "is missing")),
        Some(Value::String(s)) => OffsetDateTime::parse(s, &Rfc3339)
            .map_err(|e| ValidationError::malformed(field, format!("is not RFC 3339: {e}"))),
        Some(Value::Number(n)) => {
            let secs = n
                .as_i64()
                .ok_or_else(|| ValidationError::malformed(field, "is not an integer timestamp"))?;
            OffsetDateTime::from_unix_timestamp(secs)
                .map_err(|e| ValidationError::malformed(field, e.to_string()))
        }
        Some(other) => Err(ValidationError::malformed(
            field,
            format!("expected a timestamp, got {}", type_name(other)),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
