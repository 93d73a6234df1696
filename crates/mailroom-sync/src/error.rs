//! Error types for the mailroom-sync crate.

use thiserror::Error;

/// Alias for `Result<T, SyncError>`.
pub type SyncResult<T> = Result<T, SyncError>;

/// Why a fetch or control call failed. None of these are fatal to the
/// polling loop.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request never produced a response (connect, timeout, reset).
    #[error("transport failure: {0}")]
    Transport(String),

    /// A response arrived but its body was not what we expected.
    #[error("decode failure: {0}")]
    Decode(String),

    /// The server answered with a non-success status.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
