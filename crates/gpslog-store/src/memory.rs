//! In-memory simulation of a hosted document store.
//!
//! [`MemoryStore`] behaves like a remote, multi-writer document database:
//! writes are acknowledged asynchronously, the store's own clock stamps every
//! record, and a realtime feed reports every change. It is used by the test
//! suites and for offline demos.
//!
//! # Features
//!
//! - **Failure injection**: make the store unreachable, or fail the next N listings
//! - **Latency simulation**: delay acknowledgements and listings
//! - **Other writers**: insert raw documents as if another client wrote them

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use gpslog_types::{Coordinate, Fix, LocationRecord, RecordId};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::feed::{
    ChangeEvent, ChangeFeed, DEFAULT_FEED_CAPACITY, PendingWrites, Submission, SubscriptionId,
    SyncSubscription, WriteOrder,
};
use crate::queries::LocationQuery;
use crate::traits::LocationStore;

/// A simulated remote document store.
///
/// Cloning is cheap; clones share the same records and feed, which is how
/// tests play the part of a second writer.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use gpslog_store::{LocationStore, MemoryStore};
/// use gpslog_types::Fix;
///
/// # #[tokio::main]
/// # async fn main() -> gpslog_store::Result<()> {
/// let store = MemoryStore::new();
/// store.set_ack_latency(Duration::from_millis(10));
///
/// let submission = store.append(Fix::now(51.5, -0.12)?).await?;
/// assert_eq!(store.pending().await?.len(), 1);
///
/// submission.acknowledged().await?;
/// assert!(store.pending().await?.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    records: RwLock<Vec<LocationRecord>>,
    pending: PendingWrites,
    order: WriteOrder,
    feed: ChangeFeed,
    clock: Arc<dyn Clock>,
    next_sequence: AtomicU64,
    unavailable: AtomicBool,
    /// Number of upcoming listings that fail before succeeding again.
    failing_lists: AtomicU32,
    /// Simulated acknowledgement latency in milliseconds (0 = acknowledge on the next tick).
    ack_latency_ms: AtomicU64,
    /// Simulated listing latency in milliseconds (0 = no delay).
    list_latency_ms: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("clock", &self.inner.clock)
            .field("unavailable", &self.inner.unavailable.load(Ordering::Relaxed))
            .field("subscribed", &self.inner.feed.is_active())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store stamped by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamped by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: RwLock::new(Vec::new()),
                pending: PendingWrites::default(),
                order: WriteOrder::default(),
                feed: ChangeFeed::new(DEFAULT_FEED_CAPACITY),
                clock,
                next_sequence: AtomicU64::new(1),
                unavailable: AtomicBool::new(false),
                failing_lists: AtomicU32::new(0),
                ack_latency_ms: AtomicU64::new(0),
                list_latency_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate losing (or regaining) connectivity.
    ///
    /// While unavailable, reads and subscriptions fail with
    /// [`Error::StoreUnavailable`] and queued writes are rejected when their
    /// acknowledgement comes due.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` listings with a transient error.
    pub fn fail_next_lists(&self, count: u32) {
        self.inner.failing_lists.store(count, Ordering::SeqCst);
    }

    /// Delay acknowledgement of each write.
    pub fn set_ack_latency(&self, latency: Duration) {
        self.inner
            .ack_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay every listing.
    pub fn set_list_latency(&self, latency: Duration) {
        self.inner
            .list_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Whether a subscription is currently active.
    pub fn is_subscribed(&self) -> bool {
        self.inner.feed.is_active()
    }

    /// Commit a record directly, as another writer would.
    ///
    /// Unlike [`append`](LocationStore::append) the timestamp is taken as
    /// given, which lets tests place records at arbitrary ages.
    pub async fn insert_at(
        &self,
        latitude: f64,
        longitude: f64,
        created_at: OffsetDateTime,
    ) -> Result<LocationRecord> {
        Coordinate::new(latitude, longitude)?;
        let record = LocationRecord {
            id: Some(RecordId::generate()),
            latitude,
            longitude,
            created_at,
            sequence: None,
            submission: None,
        };
        Ok(self.inner.commit(record).await)
    }

    /// Commit a raw document written by another client.
    ///
    /// The document is decoded strictly; missing or mistyped fields are a
    /// [`Error::MalformedRecord`], never a zero default.
    pub async fn insert_document(&self, document: &Map<String, Value>) -> Result<LocationRecord> {
        let record = LocationRecord::from_document(RecordId::generate(), document)?;
        Ok(self.inner.commit(record).await)
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            Err(Error::StoreUnavailable("simulated network outage".to_string()))
        } else {
            Ok(())
        }
    }

    async fn sorted_records(&self) -> Vec<LocationRecord> {
        let mut records = self.inner.records.read().await.clone();
        records.sort_by(|a, b| a.display_order(b));
        records
    }
}

impl Inner {
    /// Assign a sequence number, store the record and notify the feed.
    async fn commit(&self, mut record: LocationRecord) -> LocationRecord {
        let mut records = self.records.write().await;
        record.sequence = Some(self.next_sequence.fetch_add(1, Ordering::SeqCst));
        records.push(record.clone());
        // Drop the placeholder while holding the records lock, so a reader
        // never sees the write in neither list.
        if let Some(submission) = record.submission {
            self.pending.remove(submission);
        }
        drop(records);

        debug!("Committed record {:?} at {}", record.id, record.created_at);
        self.feed.publish(ChangeEvent::Added {
            record: record.clone(),
        });
        record
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn append(&self, fix: Fix) -> Result<Submission> {
        fix.coordinate.validate()?;

        let submission_id = self.inner.pending.next_id();
        let placeholder = LocationRecord::pending(&fix, submission_id);
        self.inner.pending.insert(placeholder.clone());
        let (submission, ack) = Submission::new(placeholder);
        self.inner.feed.publish(ChangeEvent::PendingWrite {
            submission: submission_id,
        });

        let mut turn = self.inner.order.next_turn();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let latency = inner.ack_latency_ms.load(Ordering::SeqCst);
            if latency > 0 {
                tokio::time::sleep(Duration::from_millis(latency)).await;
            } else {
                tokio::task::yield_now().await;
            }
            turn.wait().await;

            if inner.unavailable.load(Ordering::SeqCst) {
                inner.pending.remove(submission_id);
                warn!("Write {} rejected: store unavailable", submission_id);
                inner.feed.publish(ChangeEvent::WriteFailed {
                    submission: submission_id,
                    error: "store unavailable".to_string(),
                });
                let _ = ack.send(Err(Error::StoreUnavailable(
                    "write rejected while offline".to_string(),
                )));
                return;
            }

            let record = LocationRecord {
                id: Some(RecordId::generate()),
                latitude: fix.coordinate.latitude,
                longitude: fix.coordinate.longitude,
                created_at: inner.clock.now(),
                sequence: None,
                submission: Some(submission_id),
            };
            let record = inner.commit(record).await;
            let _ = ack.send(Ok(record));
        });

        Ok(submission)
    }

    async fn list_all(&self) -> Result<Vec<LocationRecord>> {
        let latency = self.inner.list_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.check_available()?;
        let failing = self.inner.failing_lists.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner.failing_lists.store(failing - 1, Ordering::SeqCst);
            return Err(Error::StoreUnavailable("simulated transient failure".to_string()));
        }

        Ok(self.sorted_records().await)
    }

    async fn query(&self, query: &LocationQuery) -> Result<Vec<LocationRecord>> {
        self.check_available()?;
        Ok(query.apply(self.sorted_records().await))
    }

    async fn pending(&self) -> Result<Vec<LocationRecord>> {
        // Pending writes live on the client, so they are readable offline
        Ok(self.inner.pending.snapshot())
    }

    async fn count(&self) -> Result<u64> {
        self.check_available()?;
        Ok(self.inner.records.read().await.len() as u64)
    }

    async fn delete(&self, id: &RecordId) -> Result<()> {
        self.check_available()?;
        let mut records = self.inner.records.write().await;
        let Some(pos) = records.iter().position(|r| r.id.as_ref() == Some(id)) else {
            return Err(Error::NotFound(id.clone()));
        };
        records.remove(pos);
        drop(records);

        self.inner.feed.publish(ChangeEvent::Removed {
            ids: vec![id.clone()],
        });
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: OffsetDateTime) -> Result<u64> {
        self.check_available()?;
        let mut records = self.inner.records.write().await;
        let mut removed = Vec::new();
        records.retain(|r| {
            if r.created_at < cutoff {
                removed.extend(r.id.clone());
                false
            } else {
                true
            }
        });
        drop(records);

        let count = removed.len() as u64;
        if count > 0 {
            info!("Deleted {} records older than {}", count, cutoff);
            self.inner.feed.publish(ChangeEvent::Removed { ids: removed });
        }
        Ok(count)
    }

    async fn delete_all(&self) -> Result<u64> {
        self.check_available()?;
        let removed = {
            let mut records = self.inner.records.write().await;
            let n = records.len() as u64;
            records.clear();
            n
        };

        if removed > 0 {
            info!("Deleted all {} records", removed);
            self.inner.feed.publish(ChangeEvent::Cleared { removed });
        }
        Ok(removed)
    }

    async fn subscribe(&self, include_local_pending_writes: bool) -> Result<SyncSubscription> {
        self.check_available()?;
        self.inner.feed.subscribe(include_local_pending_writes)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) {
        self.inner.feed.unsubscribe(subscription);
    }

    fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }
}
