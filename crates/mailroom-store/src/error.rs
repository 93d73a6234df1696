//! Error types for the mailroom-store crate.
//!
//! All store operations return [`StoreError`] via [`StoreResult`].
//! Lock and parse failures are converted into this taxonomy at the store
//! boundary; nothing above this crate sees raw `fs2` or `tempfile` errors.

use std::path::PathBuf;

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the coordination stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The advisory lock for a document could not be acquired in time.
    #[error("resource busy: lock on {} not acquired after {waited_ms} ms", path.display())]
    ResourceBusy { path: PathBuf, waited_ms: u64 },

    /// A document could not be serialized, or the on-disk copy is unreadable.
    #[error("corrupt state in {}: {message}", path.display())]
    CorruptState { path: PathBuf, message: String },

    /// The requested record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The liveness record claims activity that the process no longer supports.
    #[error("stale worker record (message {message_id:?}, pid {pid:?}): {reason}")]
    StaleWorker {
        message_id: Option<u64>,
        pid: Option<u32>,
        reason: String,
    },

    /// A stop was requested but no worker is active.
    #[error("worker already idle")]
    AlreadyIdle,

    /// A path resolves outside the state root.
    #[error("path escapes the state root: {0}")]
    Forbidden(String),

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl StoreError {
    /// Shorthand for a [`StoreError::NotFound`] keyed by a numeric id.
    pub fn not_found(entity: &'static str, id: u64) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceBusy { .. } | Self::TaskJoin(_))
    }
}
