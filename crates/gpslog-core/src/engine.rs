//! The location sync engine.
//!
//! [`SyncEngine`] keeps an ordered, de-duplicated view of the recorded
//! locations current with the store. It is a two-state machine:
//!
//! ```text
//!          start() ok
//!   Idle ─────────────▶ Streaming
//!    ▲                      │
//!    └──────── stop() ──────┘
//! ```
//!
//! While streaming, every change notification from the store triggers a
//! reconciliation pass: the engine re-reads the pending and committed sets,
//! merges them with [`reconcile`], and publishes the result as a new
//! [`Snapshot`]. Passes publish inside a single critical section, so readers
//! and sinks only ever see whole snapshots, in version order.
//!
//! Every `start()` begins a new generation. A pass remembers the generation
//! it started in and is discarded if the engine stopped (or restarted)
//! before it could publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::{Deserialize, Serialize};
use time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use gpslog_store::{ChangeEvent, LocationStore, Submission, SubscriptionId, SyncSubscription};
use gpslog_types::{Fix, LocationRecord, RecordId};

use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, SyncEvent};
use crate::filter::{DEFAULT_MIN_DISTANCE_M, FilterDecision, FixFilter};
use crate::reconcile::{DEFAULT_DEDUP_TOLERANCE, reconcile};
use crate::retention::{self, DEFAULT_RETENTION, PurgeReport};
use crate::sink::PresentationSink;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No subscription; the last view is kept but no longer updated.
    Idle,
    /// Subscribed; the view follows the store.
    Streaming,
}

/// Configuration for a [`SyncEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Show writes that the store has not acknowledged yet.
    /// Default: true.
    pub include_local_pending_writes: bool,
    /// Purge records older than this when the engine starts.
    /// Default: 24 hours. `None` disables the startup purge.
    pub retention: Option<Duration>,
    /// How far a placeholder's client timestamp may be from the server
    /// timestamp of the record that replaces it. Default: 5 seconds.
    pub dedup_tolerance: Duration,
    /// Minimum movement between ingested fixes, in meters.
    /// Default: 100. Zero disables the distance filter.
    pub min_distance_m: f64,
    /// Extra time to wait for a burst of notifications to settle before
    /// re-reading the store. Default: zero (only already-queued
    /// notifications are coalesced).
    pub coalesce_window: std::time::Duration,
    /// Capacity of the event channel. Default: 100.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            include_local_pending_writes: true,
            retention: Some(DEFAULT_RETENTION),
            dedup_tolerance: DEFAULT_DEDUP_TOLERANCE,
            min_distance_m: DEFAULT_MIN_DISTANCE_M,
            coalesce_window: std::time::Duration::ZERO,
            event_capacity: 100,
        }
    }
}

impl EngineConfig {
    /// Set whether unacknowledged writes are shown.
    #[must_use]
    pub fn include_local_pending_writes(mut self, include: bool) -> Self {
        self.include_local_pending_writes = include;
        self
    }

    /// Set the startup retention purge.
    #[must_use]
    pub fn retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    /// Set the placeholder matching tolerance.
    #[must_use]
    pub fn dedup_tolerance(mut self, tolerance: Duration) -> Self {
        self.dedup_tolerance = tolerance;
        self
    }

    /// Set the distance filter.
    #[must_use]
    pub fn min_distance_m(mut self, meters: f64) -> Self {
        self.min_distance_m = meters;
        self
    }

    /// Set the notification coalescing window.
    #[must_use]
    pub fn coalesce_window(mut self, window: std::time::Duration) -> Self {
        self.coalesce_window = window;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.dedup_tolerance.is_negative() {
            return Err(Error::invalid_config("dedup_tolerance must not be negative"));
        }
        if let Some(retention) = self.retention
            && !retention.is_positive()
        {
            return Err(Error::invalid_config("retention must be > 0"));
        }
        if !self.min_distance_m.is_finite() || self.min_distance_m < 0.0 {
            return Err(Error::invalid_config("min_distance_m must be a non-negative number"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        Ok(())
    }
}

/// One published state of the view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Strictly increasing per engine; 0 is the empty initial view.
    pub version: u64,
    /// The `start()` generation that produced this snapshot.
    pub generation: u64,
    /// Records in display order.
    pub records: Vec<LocationRecord>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            version: 0,
            generation: 0,
            records: Vec::new(),
        }
    }

    /// Number of records in the view.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Find a committed record by id.
    pub fn get(&self, id: &RecordId) -> Option<&LocationRecord> {
        self.records.iter().find(|r| r.id.as_ref() == Some(id))
    }

    /// Records still waiting for acknowledgement.
    pub fn pending(&self) -> impl Iterator<Item = &LocationRecord> {
        self.records.iter().filter(|r| r.is_pending())
    }
}

/// State guarded by the publish lock.
struct Publisher {
    /// Generation allowed to publish; `None` while idle.
    active: Option<u64>,
    version: u64,
    sinks: Vec<Arc<dyn PresentationSink>>,
}

/// State guarded by the lifecycle lock.
struct Control {
    state: EngineState,
    subscription: Option<SubscriptionId>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    store: Arc<dyn LocationStore>,
    config: EngineConfig,
    filter: StdMutex<FixFilter>,
    control: Mutex<Control>,
    publisher: Mutex<Publisher>,
    generation: AtomicU64,
    state_tx: watch::Sender<EngineState>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    events: EventDispatcher,
}

/// Keeps an ordered view of recorded locations in sync with a store.
///
/// Cloning is cheap and clones drive the same engine.
///
/// # Example
///
/// ```
/// use gpslog_core::{EngineConfig, SyncEngine};
/// use gpslog_store::MemoryStore;
/// use gpslog_types::Fix;
///
/// # #[tokio::main]
/// # async fn main() -> gpslog_core::Result<()> {
/// let engine = SyncEngine::new(MemoryStore::new(), EngineConfig::default())?;
/// engine.start().await?;
///
/// if let Some(submission) = engine.ingest(Fix::now(35.681, 139.767)?).await? {
///     submission.acknowledged().await?;
/// }
///
/// let mut snapshots = engine.subscribe_snapshots();
/// snapshots.wait_for(|s| s.records.iter().any(|r| r.id.is_some())).await.ok();
/// engine.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("version", &self.snapshot().version)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl SyncEngine {
    /// Create an idle engine over `store`.
    pub fn new<S>(store: S, config: EngineConfig) -> Result<Self>
    where
        S: LocationStore + 'static,
    {
        Self::with_shared_store(Arc::new(store), config)
    }

    /// Create an idle engine over an already shared store.
    pub fn with_shared_store(store: Arc<dyn LocationStore>, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let filter = FixFilter::new(config.min_distance_m).with_dedup_tolerance(config.dedup_tolerance);
        let (state_tx, _) = watch::channel(EngineState::Idle);
        let (snapshot_tx, _) = watch::channel(Arc::new(Snapshot::empty()));
        let events = EventDispatcher::new(config.event_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                config,
                filter: StdMutex::new(filter),
                control: Mutex::new(Control {
                    state: EngineState::Idle,
                    subscription: None,
                    cancel: None,
                    task: None,
                }),
                publisher: Mutex::new(Publisher {
                    active: None,
                    version: 0,
                    sinks: Vec::new(),
                }),
                generation: AtomicU64::new(0),
                state_tx,
                snapshot_tx,
                events,
            }),
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn LocationStore> {
        &self.inner.store
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to the store and seed the view.
    ///
    /// Only valid while idle; a second call fails with
    /// [`Error::AlreadySubscribed`] and changes nothing. If the subscription
    /// is refused the engine stays idle with [`Error::SubscriptionFailed`];
    /// if the initial read fails it unsubscribes, stays idle and returns
    /// [`Error::StoreUnavailable`]. Either way `start()` may be retried.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;
        if control.state == EngineState::Streaming {
            return Err(Error::AlreadySubscribed);
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(age) = inner.config.retention {
            // Best effort: never blocks or fails startup
            retention::spawn_purge(Arc::clone(&inner.store), age, inner.events.clone());
        }

        let subscription = inner
            .store
            .subscribe(inner.config.include_local_pending_writes)
            .await
            .map_err(|e| {
                warn!("Subscription refused: {}", e);
                Error::SubscriptionFailed(e)
            })?;
        let subscription_id = subscription.id();

        let records = match inner.fetch().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Initial read failed, staying idle: {}", e);
                inner.store.unsubscribe(subscription_id).await;
                return Err(Error::StoreUnavailable(e));
            }
        };
        let seeded = records.len();

        {
            let mut publisher = inner.publisher.lock().await;
            publisher.active = Some(generation);
            inner.publish(&mut publisher, generation, records);
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(inner), subscription, generation, cancel.clone()));

        control.state = EngineState::Streaming;
        control.subscription = Some(subscription_id);
        control.cancel = Some(cancel);
        control.task = Some(task);
        inner.state_tx.send_replace(EngineState::Streaming);

        info!("Sync engine streaming (generation {}, {} records)", generation, seeded);
        inner.events.send(SyncEvent::Started {
            generation,
            records: seeded,
        });
        Ok(())
    }

    /// Unsubscribe and go idle, keeping the last view.
    ///
    /// Safe to call at any time: stopping an idle engine does nothing, and a
    /// reconciliation pass still in flight is discarded.
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;
        if control.state == EngineState::Idle {
            debug!("stop() on idle engine ignored");
            return Ok(());
        }

        // Close the publish gate first so no pass can land after this point
        inner.publisher.lock().await.active = None;

        if let Some(cancel) = control.cancel.take() {
            cancel.cancel();
        }
        if let Some(subscription) = control.subscription.take() {
            inner.store.unsubscribe(subscription).await;
        }
        // The loop exits on its own; a pass blocked on the store must not block stop()
        drop(control.task.take());

        control.state = EngineState::Idle;
        inner.state_tx.send_replace(EngineState::Idle);

        let generation = inner.generation.load(Ordering::SeqCst);
        info!("Sync engine stopped (generation {})", generation);
        inner.events.send(SyncEvent::Stopped { generation });
        Ok(())
    }

    /// Submit a fix for recording.
    ///
    /// Invalid coordinates fail with an `InvalidCoordinate` store error and
    /// nothing is written. Fixes rejected by the distance/duplicate filter
    /// return `Ok(None)`. The view is never changed directly; the record
    /// appears once the store reports it.
    ///
    /// A fix whose write is refused or later rejected does not count as the
    /// filter's reference point, so retrying it is not dropped as a duplicate.
    pub async fn ingest(&self, fix: Fix) -> Result<Option<Submission>> {
        fix.coordinate.validate()?;

        let decision = self.inner.lock_filter().check(&fix);
        if decision != FilterDecision::Accept {
            debug!("Dropping fix at {}: {:?}", fix.coordinate, decision);
            self.inner.events.send(SyncEvent::FixDropped { decision });
            return Ok(None);
        }

        let submission = match self.inner.store.append(fix).await {
            Ok(submission) => submission,
            Err(e) => {
                self.inner.lock_filter().rollback(&fix);
                return Err(e.into());
            }
        };
        trace!("Submitted fix {} as {}", fix.coordinate, submission.id());

        let inner = Arc::clone(&self.inner);
        let submission = submission.inspect(move |outcome| {
            if outcome.is_err() && inner.lock_filter().rollback(&fix) {
                debug!("Write of {} rejected, filter reference restored", fix.coordinate);
            }
        });
        Ok(Some(submission))
    }

    /// Delete one record.
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        Ok(self.inner.store.delete(id).await?)
    }

    /// Delete every record. Returns how many were removed.
    pub async fn clear(&self) -> Result<u64> {
        let removed = self.inner.store.delete_all().await?;
        info!("Cleared {} records", removed);
        Ok(removed)
    }

    /// Delete every record older than `age`, measured on the store's clock.
    pub async fn purge_older_than(&self, age: Duration) -> Result<PurgeReport> {
        let report = retention::purge_older_than(self.inner.store.as_ref(), age).await?;
        self.inner.events.send(SyncEvent::PurgeCompleted {
            removed: report.removed,
            cutoff: report.cutoff,
        });
        Ok(report)
    }

    /// The most recently published view.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.snapshot_tx.borrow())
    }

    /// Follow published views.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Follow lifecycle changes.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.inner.state_tx.subscribe()
    }

    /// Add a sink. It is rendered with the current view right away, then
    /// with every published snapshot.
    pub async fn attach_sink(&self, sink: Arc<dyn PresentationSink>) -> Result<()> {
        let mut publisher = self.inner.publisher.lock().await;
        let current = self.snapshot();
        off_runtime(|| sink.render(&current.records))?;
        debug!("Attached {} sink at version {}", sink.name(), current.version);
        publisher.sinks.push(sink);
        Ok(())
    }

    /// Receive engine events.
    pub fn events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn lock_filter(&self) -> std::sync::MutexGuard<'_, FixFilter> {
        self.filter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read pending writes, then the committed set, and merge them.
    ///
    /// Pending is read first: a write acknowledged between the two reads
    /// then shows up in both and is de-duplicated, instead of in neither.
    async fn fetch(&self) -> gpslog_store::Result<Vec<LocationRecord>> {
        let pending = if self.config.include_local_pending_writes {
            self.store.pending().await?
        } else {
            Vec::new()
        };
        let committed = self.store.list_all().await?;
        Ok(reconcile(committed, pending, self.config.dedup_tolerance))
    }

    /// Publish a new snapshot. Caller holds the publish lock.
    fn publish(&self, publisher: &mut Publisher, generation: u64, records: Vec<LocationRecord>) {
        publisher.version += 1;
        let snapshot = Arc::new(Snapshot {
            version: publisher.version,
            generation,
            records,
        });
        self.snapshot_tx.send_replace(Arc::clone(&snapshot));

        if publisher.sinks.is_empty() {
            return;
        }
        off_runtime(|| {
            for sink in &publisher.sinks {
                if let Err(e) = sink.render(&snapshot.records) {
                    warn!("Sink {} failed to render version {}: {}", sink.name(), snapshot.version, e);
                }
            }
        });
    }

    fn note(&self, event: &ChangeEvent) {
        trace!("Change notification: {:?}", event);
        match event {
            ChangeEvent::WriteFailed { submission, error } => {
                warn!("Write {} failed: {}", submission, error);
                self.events.send(SyncEvent::WriteFailed {
                    submission: *submission,
                    error: error.clone(),
                });
            }
            ChangeEvent::Resync { missed } => {
                debug!("Missed {} notifications, re-reading", missed);
            }
            _ => {}
        }
    }
}

/// Run blocking sink work without stalling other tasks on this worker.
///
/// On a multi-threaded runtime the worker hands its tasks off first; a
/// current-thread runtime has nowhere to move them, so `f` runs in place.
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// The reconciliation loop for one generation.
async fn run(
    inner: Arc<Inner>,
    mut subscription: SyncSubscription,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = subscription.next() => event,
        };
        let Some(event) = event else {
            warn!("Change feed closed (generation {})", generation);
            break;
        };
        inner.note(&event);

        if !inner.config.coalesce_window.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(inner.config.coalesce_window) => {}
            }
        }
        let mut coalesced = 0usize;
        while let Some(event) = subscription.try_next() {
            inner.note(&event);
            coalesced += 1;
        }
        if coalesced > 0 {
            trace!("Coalesced {} notifications", coalesced + 1);
        }

        match inner.fetch().await {
            Ok(records) => {
                let mut publisher = inner.publisher.lock().await;
                if publisher.active != Some(generation) {
                    debug!("Discarding pass from stale generation {}", generation);
                    break;
                }
                let count = records.len();
                inner.publish(&mut publisher, generation, records);
                let version = publisher.version;
                drop(publisher);

                inner.events.send(SyncEvent::Reconciled {
                    version,
                    records: count,
                });
            }
            Err(e) => {
                warn!("Reconciliation failed, keeping previous view: {}", e);
                inner.events.send(SyncEvent::ReconcileFailed {
                    generation,
                    error: e.to_string(),
                });
            }
        }
    }
    debug!("Reconciliation loop for generation {} exited", generation);
}
