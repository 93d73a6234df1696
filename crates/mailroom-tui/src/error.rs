//! TUI error types.

use thiserror::Error;

/// Unified error type for the terminal viewer.
#[derive(Error, Debug)]
pub enum TuiError {
    /// An I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the TUI crate.
pub type Result<T> = std::result::Result<T, TuiError>;
