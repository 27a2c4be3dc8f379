//! Dropping unusable and redundant fixes before they reach the store.

use serde::{Deserialize, Serialize};
use time::Duration;

use gpslog_types::Fix;

use crate::reconcile::{COORDINATE_EPSILON, DEFAULT_DEDUP_TOLERANCE};

/// Default minimum movement between recorded fixes, in meters.
pub const DEFAULT_MIN_DISTANCE_M: f64 = 100.0;

/// Outcome of offering a fix to a [`FixFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum FilterDecision {
    /// The fix should be recorded.
    Accept,
    /// Coordinate outside WGS84 bounds or not finite.
    Invalid,
    /// Same point and time as the last accepted fix.
    Duplicate,
    /// Closer than the minimum distance to the last accepted fix.
    TooClose { distance_m: f64 },
}

impl FilterDecision {
    /// Whether the fix passed the filter.
    pub fn is_accepted(&self) -> bool {
        matches!(self, FilterDecision::Accept)
    }
}

/// Stateful filter remembering the last accepted fix.
///
/// ```
/// use gpslog_core::{FilterDecision, FixFilter};
/// use gpslog_types::Fix;
///
/// let mut filter = FixFilter::new(100.0);
/// assert_eq!(filter.check(&Fix::now(35.0, 139.0)?), FilterDecision::Accept);
/// assert!(!filter.check(&Fix::now(35.0001, 139.0)?).is_accepted());
/// # Ok::<(), gpslog_types::ValidationError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FixFilter {
    min_distance_m: f64,
    dedup_tolerance: Duration,
    last_accepted: Option<Fix>,
    /// Reference to fall back to if the last accepted fix is never stored.
    previous: Option<Fix>,
}

impl Default for FixFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DISTANCE_M)
    }
}

impl FixFilter {
    /// Create a filter. A `min_distance_m` of zero disables the distance check.
    pub fn new(min_distance_m: f64) -> Self {
        Self {
            min_distance_m: min_distance_m.max(0.0),
            dedup_tolerance: DEFAULT_DEDUP_TOLERANCE,
            last_accepted: None,
            previous: None,
        }
    }

    /// Set how far apart two identical fixes may be in time and still count as duplicates.
    #[must_use]
    pub fn with_dedup_tolerance(mut self, tolerance: Duration) -> Self {
        self.dedup_tolerance = tolerance;
        self
    }

    /// The minimum distance in meters.
    pub fn min_distance_m(&self) -> f64 {
        self.min_distance_m
    }

    /// The last fix that passed the filter.
    pub fn last_accepted(&self) -> Option<&Fix> {
        self.last_accepted.as_ref()
    }

    /// Offer a fix; accepted fixes become the new reference point.
    ///
    /// The reference is provisional until the fix is stored: if the write is
    /// rejected, [`rollback`](Self::rollback) it.
    pub fn check(&mut self, fix: &Fix) -> FilterDecision {
        let decision = self.evaluate(fix);
        if decision.is_accepted() {
            self.previous = self.last_accepted.replace(*fix);
        }
        decision
    }

    /// Withdraw an accepted fix whose write failed.
    ///
    /// Restores the reference it replaced. Does nothing and returns `false`
    /// if a later fix has already taken its place.
    pub fn rollback(&mut self, fix: &Fix) -> bool {
        if self.last_accepted.as_ref() != Some(fix) {
            return false;
        }
        self.last_accepted = self.previous.take();
        true
    }

    fn evaluate(&self, fix: &Fix) -> FilterDecision {
        if fix.coordinate.validate().is_err() {
            return FilterDecision::Invalid;
        }
        let Some(last) = &self.last_accepted else {
            return FilterDecision::Accept;
        };

        if fix.coordinate.approx_eq(&last.coordinate, COORDINATE_EPSILON)
            && (fix.captured_at - last.captured_at).abs() <= self.dedup_tolerance
        {
            return FilterDecision::Duplicate;
        }

        if self.min_distance_m > 0.0 {
            let distance_m = fix.coordinate.distance_m(&last.coordinate);
            if distance_m < self.min_distance_m {
                return FilterDecision::TooClose { distance_m };
            }
        }

        FilterDecision::Accept
    }

    /// Forget the reference point, so the next valid fix is accepted.
    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.previous = None;
    }
}
