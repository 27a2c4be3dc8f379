//! SQLite-backed location store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, Row};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use gpslog_types::{Fix, LocationRecord, RecordId, SubmissionId};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::feed::{
    ChangeEvent, ChangeFeed, DEFAULT_FEED_CAPACITY, PendingWrites, Submission, SubscriptionId,
    SyncSubscription, WriteOrder,
};
use crate::queries::LocationQuery;
use crate::schema;
use crate::traits::LocationStore;

/// Persistent store for recorded locations.
///
/// Writes are acknowledged by a background task once the row is committed,
/// so the pending/committed lifecycle matches the remote store.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Mutex<Connection>,
    pending: PendingWrites,
    order: WriteOrder,
    feed: ChangeFeed,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("clock", &self.inner.clock)
            .field("subscribed", &self.inner.feed.is_active())
            .finish()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open or create a database, stamping records with the given clock.
    pub fn open_with_clock<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let mut conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        schema::initialize(&mut conn)?;

        Self::from_connection(conn, clock)
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    /// Open an in-memory database stamped by the given clock.
    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        schema::initialize(&mut conn)?;
        Self::from_connection(conn, clock)
    }

    fn from_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        // Tokens from earlier sessions stay on disk; new ones must not collide
        let last: i64 = conn.query_row(
            "SELECT COALESCE(MAX(submission), 0) FROM locations",
            [],
            |row| row.get(0),
        )?;
        debug!("Submission tokens resume after {}", last);

        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                pending: PendingWrites::starting_after(SubmissionId(last.max(0) as u64)),
                order: WriteOrder::default(),
                feed: ChangeFeed::new(DEFAULT_FEED_CAPACITY),
                clock,
            }),
        })
    }
}

impl Inner {
    /// Insert an acknowledged record and retire its placeholder.
    async fn commit(&self, fix: Fix, submission: SubmissionId) -> Result<LocationRecord> {
        let id = RecordId::generate();
        let created_at = self.clock.now();

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO locations (id, latitude, longitude, created_at, submission)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                id.as_str(),
                fix.coordinate.latitude,
                fix.coordinate.longitude,
                to_nanos(created_at),
                submission.0 as i64,
            ],
        )?;
        let seq = conn.last_insert_rowid();
        self.pending.remove(submission);
        drop(conn);

        Ok(LocationRecord {
            id: Some(id),
            latitude: fix.coordinate.latitude,
            longitude: fix.coordinate.longitude,
            created_at,
            sequence: Some(seq as u64),
            submission: Some(submission),
        })
    }
}

/// Unix nanoseconds, the on-disk timestamp representation.
pub(crate) fn to_nanos(at: OffsetDateTime) -> i64 {
    at.unix_timestamp_nanos() as i64
}

fn from_nanos(idx: usize, nanos: i64) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos)).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Integer, Box::new(e))
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<LocationRecord> {
    Ok(LocationRecord {
        sequence: Some(row.get::<_, i64>(0)? as u64),
        id: Some(RecordId::new(row.get::<_, String>(1)?)),
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        created_at: from_nanos(4, row.get(4)?)?,
        submission: row
            .get::<_, Option<i64>>(5)?
            .map(|s| SubmissionId(s as u64)),
    })
}

#[async_trait]
impl LocationStore for SqliteStore {
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
            turn.wait().await;
            match inner.commit(fix, submission_id).await {
                Ok(record) => {
                    debug!("Committed record {:?}", record.id);
                    inner.feed.publish(ChangeEvent::Added {
                        record: record.clone(),
                    });
                    let _ = ack.send(Ok(record));
                }
                Err(e) => {
                    inner.pending.remove(submission_id);
                    warn!("Write {} failed: {}", submission_id, e);
                    inner.feed.publish(ChangeEvent::WriteFailed {
                        submission: submission_id,
                        error: e.to_string(),
                    });
                    let _ = ack.send(Err(e));
                }
            }
        });

        Ok(submission)
    }

    async fn list_all(&self) -> Result<Vec<LocationRecord>> {
        self.query(&LocationQuery::new()).await
    }

    async fn query(&self, query: &LocationQuery) -> Result<Vec<LocationRecord>> {
        // Bound parameters are not Send; build them only once the lock is held
        let conn = self.inner.conn.lock().await;
        let (_, params) = query.build_where();
        let sql = query.build_sql();
        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_ref.as_slice(), row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    async fn pending(&self) -> Result<Vec<LocationRecord>> {
        Ok(self.inner.pending.snapshot())
    }

    async fn count(&self) -> Result<u64> {
        let conn = self.inner.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    async fn delete(&self, id: &RecordId) -> Result<()> {
        let conn = self.inner.conn.lock().await;
        let deleted = conn.execute("DELETE FROM locations WHERE id = ?", [id.as_str()])?;
        drop(conn);

        if deleted == 0 {
            return Err(Error::NotFound(id.clone()));
        }
        self.inner.feed.publish(ChangeEvent::Removed {
            ids: vec![id.clone()],
        });
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let conn = self.inner.conn.lock().await;
        let mut stmt = conn.prepare("DELETE FROM locations WHERE created_at < ? RETURNING id")?;
        let removed = stmt
            .query_map([to_nanos(cutoff)], |row| row.get::<_, String>(0))?
            .map(|id| id.map(RecordId::new))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let count = removed.len() as u64;
        if count > 0 {
            info!("Deleted {} records older than {}", count, cutoff);
            self.inner.feed.publish(ChangeEvent::Removed { ids: removed });
        }
        Ok(count)
    }

    async fn delete_all(&self) -> Result<u64> {
        let conn = self.inner.conn.lock().await;
        let removed = conn.execute("DELETE FROM locations", [])? as u64;
        drop(conn);

        if removed > 0 {
            info!("Deleted all {} records", removed);
            self.inner.feed.publish(ChangeEvent::Cleared { removed });
        }
        Ok(removed)
    }

    async fn subscribe(&self, include_local_pending_writes: bool) -> Result<SyncSubscription> {
        self.inner.feed.subscribe(include_local_pending_writes)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) {
        self.inner.feed.unsubscribe(subscription);
    }

    fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use time::macros::datetime;

    #[test]
    fn test_nanos_round_trip_keeps_subsecond_precision() {
        let at = datetime!(2024-05-01 12:00:00.123_456_789 UTC);
        assert_eq!(from_nanos(0, to_nanos(at)).unwrap(), at);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("locations.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .append(Fix::now(48.85, 2.35).unwrap())
                .await
                .unwrap()
                .acknowledged()
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let records = store.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].latitude, 48.85);
        assert_eq!(records[0].sequence, Some(1));
    }

    #[tokio::test]
    async fn test_submission_tokens_not_reused_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.db");

        let earlier = {
            let store = SqliteStore::open(&path).unwrap();
            store
                .append(Fix::now(10.0, 10.0).unwrap())
                .await
                .unwrap()
                .acknowledged()
                .await
                .unwrap()
        };

        let store = SqliteStore::open(&path).unwrap();
        let submission = store.append(Fix::now(50.0, 50.0).unwrap()).await.unwrap();
        assert_ne!(Some(submission.id()), earlier.submission);

        let record = submission.acknowledged().await.unwrap();
        let tokens: Vec<_> = store
            .list_all()
            .await
            .unwrap()
            .iter()
            .map(|r| r.submission)
            .collect();
        assert_eq!(tokens, vec![earlier.submission, record.submission]);
    }

    #[tokio::test]
    async fn test_query_time_window() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 08:00 UTC)));
        let store = SqliteStore::open_in_memory_with_clock(clock.clone()).unwrap();

        for hour in 0..4 {
            store
                .append(Fix::now(hour as f64, 0.0).unwrap())
                .await
                .unwrap()
                .acknowledged()
                .await
                .unwrap();
            clock.advance(time::Duration::hours(1));
        }

        let query = LocationQuery::new()
            .since(datetime!(2024-05-01 09:00 UTC))
            .until(datetime!(2024-05-01 10:00 UTC));
        let lats: Vec<f64> = store.query(&query).await.unwrap().iter().map(|r| r.latitude).collect();
        assert_eq!(lats, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_delete_older_than_reports_ids() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-01 00:00 UTC)));
        let store = SqliteStore::open_in_memory_with_clock(clock.clone()).unwrap();
        let old = store
            .append(Fix::now(1.0, 1.0).unwrap())
            .await
            .unwrap()
            .acknowledged()
            .await
            .unwrap();
        clock.advance(time::Duration::hours(30));
        store
            .append(Fix::now(2.0, 2.0).unwrap())
            .await
            .unwrap()
            .acknowledged()
            .await
            .unwrap();

        let mut sub = store.subscribe(false).await.unwrap();
        let cutoff = clock.now() - time::Duration::hours(24);
        assert_eq!(store.delete_older_than(cutoff).await.unwrap(), 1);

        let expected = old.id.into_iter().collect::<Vec<_>>();
        assert_eq!(sub.next().await, Some(ChangeEvent::Removed { ids: expected }));
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
