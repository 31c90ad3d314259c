//! Error types for confcenter.
//!
//! The consumer path (registry lookups, document accessors, listener fan-out) never
//! returns these: missing data resolves to empty content or a default. Errors surface
//! only from bootstrap (settings, watcher, scheduler) and administrative store writes.

/// Result type alias for confcenter operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Result type alias for coordination store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors that can occur when bootstrapping or administering configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to load bootstrap settings.
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    /// Failed to deserialize bootstrap settings.
    #[error("Failed to deserialize configuration: {0}")]
    DeserializationError(String),

    /// File watching is not supported or failed to initialize.
    #[error("File watching error: {0}")]
    WatchError(String),

    /// The delayed-task runtime could not be created.
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Coordination store rejected an administrative operation.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Generic error for other cases.
    #[error("Configuration error: {0}")]
    Other(String),
}

/// Outcomes reported by a coordination store.
///
/// `NotFound` is the distinguished non-fatal outcome; everything else is treated as a
/// transient failure by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The node does not exist.
    #[error("node not found: {path}")]
    NotFound {
        /// Path that was looked up
        path: String,
    },

    /// The node already exists.
    #[error("node already exists: {path}")]
    NodeExists {
        /// Path that was created
        path: String,
    },

    /// The connection to the store is currently unavailable.
    #[error("connection to store lost")]
    ConnectionLoss,

    /// The session expired; watches must be reinstalled after reconnect.
    #[error("store session expired")]
    SessionExpired,

    /// Any other store failure.
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Create a not-found error for `path`.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Whether this is the non-fatal "absent" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}
