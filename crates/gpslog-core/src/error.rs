//! Error types for gpslog-core.
//!
//! | Error | Strategy |
//! |-------|----------|
//! | [`Error::StoreUnavailable`] | Retry `start()` later; the engine stays idle |
//! | [`Error::SubscriptionFailed`] | Check that no other engine holds the feed |
//! | [`Error::AlreadySubscribed`] | Caller bug: `stop()` before starting again |
//! | [`Error::Store`] | Inspect the inner error; see [`gpslog_store::Error::is_transient`] |
//! | [`Error::InvalidConfig`] | Fix configuration and restart |
//! | [`Error::Source`] | Skip the input; the source keeps going |

/// Result type for gpslog-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the sync engine, sources and sinks.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Error returned by the underlying store.
    #[error(transparent)]
    Store(#[from] gpslog_store::Error),

    /// The store refused the realtime subscription.
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(#[source] gpslog_store::Error),

    /// The engine is already streaming.
    #[error("Engine is already subscribed")]
    AlreadySubscribed,

    /// The store could not be reached while seeding the view.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] gpslog_store::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A location source produced unusable input.
    #[error("Source error at line {line}: {reason}")]
    Source { line: usize, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a source parse error.
    pub fn source(line: usize, reason: impl Into<String>) -> Self {
        Error::Source {
            line,
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig(message.into())
    }
}

impl From<gpslog_types::ValidationError> for Error {
    fn from(err: gpslog_types::ValidationError) -> Self {
        Error::Store(err.into())
    }
}
