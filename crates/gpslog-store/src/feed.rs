//! Realtime change feed shared by the store implementations.
//!
//! A store owns one [`ChangeFeed`]. At most one [`SyncSubscription`] can be
//! active on it at a time; each subscription gets its own broadcast channel,
//! so unsubscribing closes the receiver held by the subscriber.
//!
//! Notifications are hints, not diffs the subscriber must apply: if a
//! subscriber falls behind and the channel overflows, it receives a single
//! [`ChangeEvent::Resync`] and is expected to re-read the store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use gpslog_types::{LocationRecord, RecordId, SubmissionId};

use crate::error::{Error, Result};

/// Default capacity of a subscription's notification channel.
pub const DEFAULT_FEED_CAPACITY: usize = 64;

/// A change visible to the subscriber.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ChangeEvent {
    /// A local write was submitted and is awaiting acknowledgement.
    /// Only delivered to subscriptions that include local pending writes.
    PendingWrite { submission: SubmissionId },
    /// A record was committed (by this client or another writer).
    Added { record: LocationRecord },
    /// Records were deleted.
    Removed { ids: Vec<RecordId> },
    /// Every record was deleted.
    Cleared { removed: u64 },
    /// A submitted write was rejected by the store.
    WriteFailed {
        submission: SubmissionId,
        error: String,
    },
    /// The subscriber missed notifications and should re-read everything.
    Resync { missed: u64 },
}

impl ChangeEvent {
    fn is_pending_only(&self) -> bool {
        matches!(self, ChangeEvent::PendingWrite { .. })
    }
}

/// Identity of one subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// An active realtime feed.
///
/// Dropping the subscription does not unsubscribe it; call
/// [`LocationStore::unsubscribe`](crate::LocationStore::unsubscribe) with
/// [`SyncSubscription::id`].
#[derive(Debug)]
pub struct SyncSubscription {
    id: SubscriptionId,
    include_local_pending_writes: bool,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl SyncSubscription {
    /// This subscription's identity.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether pending local writes are delivered on this feed.
    pub fn include_local_pending_writes(&self) -> bool {
        self.include_local_pending_writes
    }

    /// Wait for the next change. Returns `None` once unsubscribed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                Some(ChangeEvent::Resync { missed })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Take an already-queued change without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                Some(ChangeEvent::Resync { missed })
            }
            Err(_) => None,
        }
    }
}

struct ActiveFeed {
    id: SubscriptionId,
    include_local_pending_writes: bool,
    sender: broadcast::Sender<ChangeEvent>,
}

/// Change notification fan-out owned by a store.
pub(crate) struct ChangeFeed {
    active: Mutex<Option<ActiveFeed>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl ChangeFeed {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn subscribe(&self, include_local_pending_writes: bool) -> Result<SyncSubscription> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return Err(Error::AlreadySubscribed);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = broadcast::channel(self.capacity);
        *active = Some(ActiveFeed {
            id,
            include_local_pending_writes,
            sender,
        });
        debug!("Subscription {} opened (pending writes: {})", id, include_local_pending_writes);

        Ok(SyncSubscription {
            id,
            include_local_pending_writes,
            receiver,
        })
    }

    /// Close the subscription if it is the active one. Stale ids are ignored.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|feed| feed.id == id) {
            *active = None;
            debug!("Subscription {} closed", id);
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn publish(&self, event: ChangeEvent) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(feed) = active.as_ref() {
            if event.is_pending_only() && !feed.include_local_pending_writes {
                return;
            }
            // No receiver just means the subscriber is between passes
            let _ = feed.sender.send(event);
        }
    }
}

/// Writes submitted to the store but not yet acknowledged.
#[derive(Default)]
pub(crate) struct PendingWrites {
    records: Mutex<BTreeMap<SubmissionId, LocationRecord>>,
    next_submission: AtomicU64,
}

impl PendingWrites {
    /// Issue tokens after `last`, so they never repeat one already on disk.
    pub(crate) fn starting_after(last: SubmissionId) -> Self {
        Self {
            records: Mutex::default(),
            next_submission: AtomicU64::new(last.0),
        }
    }

    pub(crate) fn next_id(&self) -> SubmissionId {
        SubmissionId(self.next_submission.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) fn insert(&self, record: LocationRecord) {
        if let Some(submission) = record.submission {
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(submission, record);
        }
    }

    pub(crate) fn remove(&self, submission: SubmissionId) -> Option<LocationRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&submission)
    }

    pub(crate) fn snapshot(&self) -> Vec<LocationRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// Orders acknowledgements so one client's writes commit in submission order.
///
/// Each write takes a [`WriteTurn`] when it is submitted; the turn waits for
/// the previous write's turn to be dropped.
#[derive(Default)]
pub(crate) struct WriteOrder {
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

impl WriteOrder {
    /// Take the next turn. Must be called in submission order.
    pub(crate) fn next_turn(&self) -> WriteTurn {
        let (done, rx) = oneshot::channel();
        let previous = self
            .tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(rx);
        WriteTurn {
            previous,
            _done: done,
        }
    }
}

/// A place in the write order; dropping it lets the next write proceed.
pub(crate) struct WriteTurn {
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl WriteTurn {
    /// Wait until every earlier write has finished.
    pub(crate) async fn wait(&mut self) {
        if let Some(previous) = self.previous.take() {
            // The sender is never used; the channel closes when the turn drops
            let _ = previous.await;
        }
    }
}

/// Handle to a submitted write.
///
/// `append` returns as soon as the write is queued; the authoritative record
/// (with its id and server timestamp) arrives through this handle and, for
/// subscribers, through the change feed.
#[derive(Debug)]
pub struct Submission {
    placeholder: LocationRecord,
    receiver: oneshot::Receiver<Result<LocationRecord>>,
}

impl Submission {
    pub(crate) fn new(
        placeholder: LocationRecord,
    ) -> (Self, oneshot::Sender<Result<LocationRecord>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                placeholder,
                receiver: rx,
            },
            tx,
        )
    }

    /// The submission token.
    pub fn id(&self) -> SubmissionId {
        // Placeholders are always built with a submission token
        self.placeholder.submission.unwrap_or(SubmissionId(0))
    }

    /// The pending record as it looks before acknowledgement.
    pub fn placeholder(&self) -> &LocationRecord {
        &self.placeholder
    }

    /// Wait for the store to acknowledge (or reject) the write.
    pub async fn acknowledged(self) -> Result<LocationRecord> {
        self.receiver.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Run `inspect` on the outcome before it reaches the returned handle.
    ///
    /// `inspect` runs even if the returned handle is dropped. Must be called
    /// within a tokio runtime.
    pub fn inspect<F>(self, inspect: F) -> Submission
    where
        F: FnOnce(&Result<LocationRecord>) + Send + 'static,
    {
        let (relay, ack) = Submission::new(self.placeholder.clone());
        tokio::spawn(async move {
            let outcome = self.acknowledged().await;
            inspect(&outcome);
            let _ = ack.send(outcome);
        });
        relay
    }
}
