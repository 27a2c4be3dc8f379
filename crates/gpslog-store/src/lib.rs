//! Location record stores for gpslog.
//!
//! This crate defines the [`LocationStore`] capability the sync engine is
//! written against, and two implementations of it:
//!
//! - [`MemoryStore`]: simulates a hosted, multi-writer document database with
//!   asynchronous acknowledgements, a server clock and failure injection
//! - [`SqliteStore`]: persists records to a local SQLite database
//!
//! Both stamp records with their own [`Clock`], assign ids on
//! acknowledgement, and report changes through a single-subscriber realtime
//! feed ([`SyncSubscription`]).
//!
//! # Example
//!
//! ```no_run
//! use gpslog_store::{LocationQuery, LocationStore, SqliteStore};
//!
//! # #[tokio::main]
//! # async fn main() -> gpslog_store::Result<()> {
//! let store = SqliteStore::open_default()?;
//!
//! let recent = store.query(&LocationQuery::new().newest_first().limit(10)).await?;
//! for record in recent {
//!     println!("{} {}", record.created_at, record.title());
//! }
//! # Ok(())
//! # }
//! ```

mod clock;
mod error;
mod feed;
mod memory;
mod queries;
mod schema;
mod sqlite;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use feed::{ChangeEvent, DEFAULT_FEED_CAPACITY, Submission, SubscriptionId, SyncSubscription};
pub use memory::MemoryStore;
pub use queries::LocationQuery;
pub use sqlite::SqliteStore;
pub use traits::LocationStore;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/gpslog/locations.db`
/// - macOS: `~/Library/Application Support/gpslog/locations.db`
/// - Windows: `C:\Users\<user>\AppData\Local\gpslog\locations.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("gpslog")
        .join("locations.db")
}
