//! Location sync engine for gpslog.
//!
//! This crate turns raw GPS fixes into a consistent, ordered view of the
//! recorded locations, kept in sync with a possibly multi-writer store.
//!
//! # Features
//!
//! - **Sync engine**: an `Idle`/`Streaming` state machine that reconciles the
//!   store's change feed into versioned snapshots
//! - **Reconciliation**: merge by store id, retire pending placeholders once
//!   acknowledged, order by server timestamp
//! - **Retention**: age-based purge on startup or on demand
//! - **Fix filtering**: drop invalid, duplicate and too-close fixes
//! - **Sources**: text lines, NMEA 0183 sentences, simulated walks
//! - **Sinks**: text list, GeoJSON map pins, in-memory capture
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use gpslog_core::{EngineConfig, GeoJsonSink, LocationSource, NmeaSource, SyncEngine};
//! use gpslog_store::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = SyncEngine::new(SqliteStore::open_default()?, EngineConfig::default())?;
//!     engine.attach_sink(Arc::new(GeoJsonSink::new("pins.geojson"))).await?;
//!     engine.start().await?;
//!
//!     let stdin = tokio::io::BufReader::new(tokio::io::stdin());
//!     let mut fixes = NmeaSource::new(stdin).into_stream();
//!     while let Some(fix) = fixes.next().await {
//!         engine.ingest(fix?).await?;
//!     }
//!
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod events;
pub mod filter;
pub mod reconcile;
pub mod retention;
pub mod sink;
pub mod source;

pub use engine::{EngineConfig, EngineState, Snapshot, SyncEngine};
pub use error::{Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, SyncEvent};
pub use filter::{FilterDecision, FixFilter};
pub use reconcile::reconcile;
pub use retention::{PurgeReport, purge_older_than};
pub use sink::{GeoJsonSink, ListSink, MemorySink, PresentationSink};
pub use source::{LineSource, LocationSource, NmeaParser, NmeaSource, SimulatedSource};

// Re-export from gpslog-types and gpslog-store
pub use gpslog_store::{LocationStore, Submission};
pub use gpslog_types::{Coordinate, Fix, LocationRecord, RecordId};
