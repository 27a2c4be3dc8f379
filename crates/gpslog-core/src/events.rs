//! Engine event system.
//!
//! The [`SyncEngine`](crate::SyncEngine) reports lifecycle changes,
//! reconciliation passes and background failures on a broadcast channel.
//! Events are informational; the authoritative view is the snapshot.

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use gpslog_types::SubmissionId;

use crate::filter::FilterDecision;

/// Events emitted by the sync engine.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SyncEvent {
    /// The engine subscribed and seeded its view.
    Started { generation: u64, records: usize },
    /// A reconciliation pass published a new snapshot.
    Reconciled { version: u64, records: usize },
    /// A reconciliation pass failed; the previous view is kept.
    ReconcileFailed { generation: u64, error: String },
    /// The engine unsubscribed.
    Stopped { generation: u64 },
    /// An ingested fix was filtered out.
    FixDropped { decision: FilterDecision },
    /// The store rejected a submitted write.
    WriteFailed {
        submission: SubmissionId,
        error: String,
    },
    /// A retention purge finished.
    PurgeCompleted {
        removed: u64,
        #[serde(with = "time::serde::rfc3339")]
        cutoff: OffsetDateTime,
    },
    /// A retention purge failed.
    PurgeFailed { error: String },
}

/// Sender for engine events.
pub type EventSender = broadcast::Sender<SyncEvent>;

/// Receiver for engine events.
pub type EventReceiver = broadcast::Receiver<SyncEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SyncEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
