//! Error types for the log-view engine.

use thiserror::Error;

/// Errors from primary store operations.
///
/// None of these reach the host through the engine: reads and writes are
/// retried with backoff and only show up as latency and as the engine's
/// unresolved issue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrimaryStoreError {
    /// Conditional write rejected: the stored ETag does not match.
    #[error("ETag mismatch: expected {expected:?}, found {actual:?}")]
    ConditionFailed {
        /// The ETag the writer expected (`None` for a first write).
        expected: Option<String>,
        /// The ETag currently in the store (`None` if the record is absent).
        actual: Option<String>,
    },

    /// The store could not be reached.
    #[error("primary store unavailable")]
    Unavailable,

    /// The operation failed and its effect is unknown.
    #[error("transient store error: {0}")]
    Transient(String),

    /// The stored payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The primary holds an older version than this replica already confirmed.
    #[error("primary at version {stored} is behind confirmed version {confirmed}")]
    Regressed {
        /// Version found in the primary.
        stored: u64,
        /// Version this replica had confirmed.
        confirmed: u64,
    },
}

impl PrimaryStoreError {
    /// Whether this is a definite rejection of a conditional write.
    ///
    /// The write path does not treat conflicts differently from other
    /// failures; this is for logging and statistics.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PrimaryStoreError::ConditionFailed { .. })
    }
}

impl From<serde_json::Error> for PrimaryStoreError {
    fn from(err: serde_json::Error) -> Self {
        PrimaryStoreError::Serialization(err.to_string())
    }
}

/// Invalid engine configuration. Raised at construction, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The entity key is empty.
    #[error("entity key must not be empty")]
    EmptyKey,

    /// The local replica id is empty.
    #[error("replica id must not be empty")]
    EmptyReplicaId,

    /// The replica id cannot be encoded in a write vector.
    #[error("replica id {0:?} must not contain ','")]
    InvalidReplicaId(String),

    /// Notifications must be allowed to carry at least one entry.
    #[error("max_entries_in_notifications must be at least 1")]
    ZeroNotificationBatch,
}

/// Failure reported by a host's view update callback.
///
/// The engine logs and skips the offending entry; the error never
/// propagates further.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("view update failed: {0}")]
pub struct UpdateViewError(pub String);

impl UpdateViewError {
    /// Create an error from any message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors returned by engine queries and by the actor handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogViewError {
    /// The storage strategy does not keep the log.
    #[error("log segments are not retained by the {0} strategy")]
    SegmentUnsupported(&'static str),

    /// The requested segment lies outside the confirmed log.
    #[error("segment {from}..{to} out of range (confirmed version {version})")]
    SegmentOutOfRange {
        /// First requested position.
        from: u64,
        /// One past the last requested position.
        to: u64,
        /// The confirmed version at the time of the request.
        version: u64,
    },

    /// The engine's actor task has stopped.
    #[error("log view actor stopped")]
    EngineStopped,
}
