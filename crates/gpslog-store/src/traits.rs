//! The [`LocationStore`] abstraction.
//!
//! This is the capability the sync engine is written against: an
//! append-only, queryable collection of timestamped coordinates with
//! server-side timestamps and a realtime change feed. [`MemoryStore`]
//! simulates a hosted document database; [`SqliteStore`] persists to disk.
//!
//! [`MemoryStore`]: crate::MemoryStore
//! [`SqliteStore`]: crate::SqliteStore

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use gpslog_types::{Fix, LocationRecord, RecordId};

use crate::clock::Clock;
use crate::error::Result;
use crate::feed::{Submission, SubscriptionId, SyncSubscription};
use crate::queries::LocationQuery;

/// Trait abstracting a location record store.
///
/// # Example
///
/// ```
/// use gpslog_store::{LocationStore, MemoryStore};
/// use gpslog_types::Fix;
///
/// # #[tokio::main]
/// # async fn main() -> gpslog_store::Result<()> {
/// let store = MemoryStore::new();
/// let submission = store.append(Fix::now(35.68, 139.76)?).await?;
/// let record = submission.acknowledged().await?;
/// assert!(record.id.is_some());
/// assert_eq!(store.list_all().await?.len(), 1);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Submit a fix for durable storage.
    ///
    /// Fails with [`Error::InvalidCoordinate`](crate::Error::InvalidCoordinate)
    /// before anything is queued. Otherwise returns as soon as the write is
    /// queued; the store assigns the id and authoritative `created_at`
    /// asynchronously.
    async fn append(&self, fix: Fix) -> Result<Submission>;

    /// Every committed record, ordered by `created_at` then insertion order.
    async fn list_all(&self) -> Result<Vec<LocationRecord>>;

    /// Committed records matching a query.
    async fn query(&self, query: &LocationQuery) -> Result<Vec<LocationRecord>>;

    /// Writes submitted through this store that are not acknowledged yet.
    async fn pending(&self) -> Result<Vec<LocationRecord>>;

    /// Number of committed records.
    async fn count(&self) -> Result<u64>;

    /// Delete one record. Fails with [`Error::NotFound`](crate::Error::NotFound).
    async fn delete(&self, id: &RecordId) -> Result<()>;

    /// Delete every record with `created_at < cutoff`. Returns how many were removed.
    async fn delete_older_than(&self, cutoff: OffsetDateTime) -> Result<u64>;

    /// Delete every record. Returns how many were removed.
    async fn delete_all(&self) -> Result<u64>;

    /// Start the realtime change feed.
    ///
    /// Fails with [`Error::AlreadySubscribed`](crate::Error::AlreadySubscribed)
    /// while another subscription is active.
    async fn subscribe(&self, include_local_pending_writes: bool) -> Result<SyncSubscription>;

    /// Stop a change feed. Unknown or already-closed ids are a no-op.
    async fn unsubscribe(&self, subscription: SubscriptionId);

    /// The clock this store stamps records with.
    fn clock(&self) -> Arc<dyn Clock>;
}

#[async_trait]
impl<S: LocationStore + ?Sized> LocationStore for Arc<S> {
    async fn append(&self, fix: Fix) -> Result<Submission> {
        (**self).append(fix).await
    }

    async fn list_all(&self) -> Result<Vec<LocationRecord>> {
        (**self).list_all().await
    }

    async fn query(&self, query: &LocationQuery) -> Result<Vec<LocationRecord>> {
        (**self).query(query).await
    }

    async fn pending(&self) -> Result<Vec<LocationRecord>> {
        (**self).pending().await
    }

    async fn count(&self) -> Result<u64> {
        (**self).count().await
    }

    async fn delete(&self, id: &RecordId) -> Result<()> {
        (**self).delete(id).await
    }

    async fn delete_older_than(&self, cutoff: OffsetDateTime) -> Result<u64> {
        (**self).delete_older_than(cutoff).await
    }

    async fn delete_all(&self) -> Result<u64> {
        (**self).delete_all().await
    }

    async fn subscribe(&self, include_local_pending_writes: bool) -> Result<SyncSubscription> {
        (**self).subscribe(include_local_pending_writes).await
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) {
        (**self).unsubscribe(subscription).await
    }

    fn clock(&self) -> Arc<dyn Clock> {
        (**self).clock()
    }
}
