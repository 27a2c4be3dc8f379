//! Core types for recorded locations.

use core::cmp::Ordering;
use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ValidationError, ValidationResult};

/// Mean Earth radius in meters, used for great-circle distances.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 coordinate in decimal degrees.
///
/// Construct through [`Coordinate::new`] to get a validated value. The fields
/// are public for pattern matching and serialization, so values built by hand
/// should be checked with [`Coordinate::validate`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coordinate {
    /// Latitude in degrees, `-90..=90`.
    pub latitude: f64,
    /// Longitude in degrees, `-180..=180`.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a validated coordinate.
    ///
    /// # Examples
    ///
    /// ```
    /// use gpslog_types::Coordinate;
    ///
    /// assert!(Coordinate::new(35.681, 139.767).is_ok());
    /// assert!(Coordinate::new(91.0, 0.0).is_err());
    /// assert!(Coordinate::new(0.0, f64::NAN).is_err());
    /// ```
    pub fn new(latitude: f64, longitude: f64) -> ValidationResult<Self> {
        let coordinate = Self {
            latitude,
            longitude,
        };
        coordinate.validate()?;
        Ok(coordinate)
    }

    /// Check whether a latitude/longitude pair is within WGS84 bounds.
    #[must_use]
    pub fn is_valid(latitude: f64, longitude: f64) -> bool {
        latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude)
    }

    /// Validate this coordinate.
    pub fn validate(&self) -> ValidationResult<()> {
        if Self::is_valid(self.latitude, self.longitude) {
            Ok(())
        } else {
            Err(ValidationError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }

    /// Great-circle distance to another coordinate in meters (haversine).
    #[must_use]
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }

    /// Whether two coordinates are equal within `epsilon` degrees on both axes.
    #[must_use]
    pub fn approx_eq(&self, other: &Coordinate, epsilon: f64) -> bool {
        (self.latitude - other.latitude).abs() <= epsilon
            && (self.longitude - other.longitude).abs() <= epsilon
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// A single raw reading from a location source.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Fix {
    /// Where the fix was taken.
    pub coordinate: Coordinate,
    /// When the fix was captured by the source (client clock).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub captured_at: OffsetDateTime,
}

impl Fix {
    /// Create a fix, validating the coordinate.
    pub fn new(latitude: f64, longitude: f64, captured_at: OffsetDateTime) -> ValidationResult<Self> {
        Ok(Self {
            coordinate: Coordinate::new(latitude, longitude)?,
            captured_at,
        })
    }

    /// Create a fix captured now.
    pub fn now(latitude: f64, longitude: f64) -> ValidationResult<Self> {
        Self::new(latitude, longitude, OffsetDateTime::now_utc())
    }
}

/// Store-assigned record identifier.
///
/// Opaque to callers; stores generate them as UUID strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RecordId(String);

impl RecordId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Token identifying one `append` call.
///
/// Carried by the pending placeholder and by the acknowledged record, so the
/// two can be matched exactly during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SubmissionId(pub u64);

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A recorded location, either acknowledged by the store or still pending.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocationRecord {
    /// Store-assigned identifier; `None` while the write is pending.
    pub id: Option<RecordId>,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Server timestamp once acknowledged, client timestamp while pending.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub created_at: OffsetDateTime,
    /// Store insertion order, used to break `created_at` ties.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub sequence: Option<u64>,
    /// The `append` call that produced this record, if known.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub submission: Option<SubmissionId>,
}

impl LocationRecord {
    /// Build the pending placeholder for a fix that has been submitted.
    #[must_use]
    pub fn pending(fix: &Fix, submission: SubmissionId) -> Self {
        Self {
            id: None,
            latitude: fix.coordinate.latitude,
            longitude: fix.coordinate.longitude,
            created_at: fix.captured_at,
            sequence: None,
            submission: Some(submission),
        }
    }

    /// Whether the store has not acknowledged this record yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.id.is_none()
    }

    /// The record's coordinate.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Total display order: `created_at`, then insertion sequence.
    ///
    /// Pending records (no sequence) sort after committed ones sharing a
    /// timestamp, and among themselves by submission order.
    #[must_use]
    pub fn display_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| match (self.sequence, other.sequence) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => self.submission.cmp(&other.submission),
            })
    }

    /// Map-pin style title: `"lat,lon"`.
    #[must_use]
    pub fn title(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}
