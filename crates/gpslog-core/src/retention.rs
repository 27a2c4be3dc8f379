//! Age-based retention of recorded locations.
//!
//! The cutoff is always computed from the store's clock, so records are
//! judged by the same clock that stamped them.

use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use gpslog_store::LocationStore;

use crate::error::{Error, Result};
use crate::events::{EventDispatcher, SyncEvent};

/// Records older than this are purged when the engine starts.
pub const DEFAULT_RETENTION: Duration = Duration::hours(24);

/// Outcome of a purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Records with `created_at` before this instant were deleted.
    #[serde(with = "time::serde::rfc3339")]
    pub cutoff: OffsetDateTime,
    /// How many records were deleted.
    pub removed: u64,
}

/// `now - age`, rejecting negative ages and out-of-range results.
pub fn retention_cutoff(now: OffsetDateTime, age: Duration) -> Result<OffsetDateTime> {
    if age.is_negative() {
        return Err(Error::invalid_config(format!("retention age must not be negative, got {age}")));
    }
    now.checked_sub(age)
        .ok_or_else(|| Error::invalid_config(format!("retention age {age} is out of range")))
}

/// Delete every record older than `age`.
pub async fn purge_older_than<S>(store: &S, age: Duration) -> Result<PurgeReport>
where
    S: LocationStore + ?Sized,
{
    let cutoff = retention_cutoff(store.clock().now(), age)?;
    let removed = store.delete_older_than(cutoff).await?;
    if removed > 0 {
        info!("Purged {} records older than {}", removed, cutoff);
    }
    Ok(PurgeReport { cutoff, removed })
}

/// Run one purge in the background, reporting the outcome as an event.
pub(crate) fn spawn_purge(
    store: Arc<dyn LocationStore>,
    age: Duration,
    events: EventDispatcher,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match purge_older_than(store.as_ref(), age).await {
            Ok(report) => events.send(SyncEvent::PurgeCompleted {
                removed: report.removed,
                cutoff: report.cutoff,
            }),
            Err(e) => {
                warn!("Retention purge failed: {}", e);
                events.send(SyncEvent::PurgeFailed {
                    error: e.to_string(),
                });
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpslog_store::{Clock, ManualClock, MemoryStore};
    use time::macros::datetime;

    #[test]
    fn test_cutoff() {
        let now = datetime!(2024-05-02 12:00 UTC);
        assert_eq!(
            retention_cutoff(now, DEFAULT_RETENTION).unwrap(),
            datetime!(2024-05-01 12:00 UTC)
        );
        assert_eq!(retention_cutoff(now, Duration::ZERO).unwrap(), now);
        assert!(matches!(
            retention_cutoff(now, Duration::hours(-1)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_uses_store_clock() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-02 12:00 UTC)));
        let store = MemoryStore::with_clock(clock.clone());
        let now = clock.now();
        for hours in [23, 25, 48] {
            store.insert_at(0.0, 0.0, now - Duration::hours(hours)).await.unwrap();
        }

        let report = purge_older_than(&store, DEFAULT_RETENTION).await.unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.cutoff, datetime!(2024-05-01 12:00 UTC));
        assert_eq!(store.count().await.unwrap(), 1);

        let again = purge_older_than(&store, DEFAULT_RETENTION).await.unwrap();
        assert_eq!(again.removed, 0);
    }

    #[tokio::test]
    async fn test_spawned_purge_reports_failure() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let events = EventDispatcher::new(8);
        let mut rx = events.subscribe();

        spawn_purge(Arc::new(store), DEFAULT_RETENTION, events).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::PurgeFailed { .. }));
    }
}
