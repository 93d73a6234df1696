//! Terminal viewer for Mailroom.
//!
//! A ratatui front end over [`mailroom_sync::SyncClient`]. It shows the
//! merged timeline next to the worker log tail, keeps the log pinned to the
//! bottom while the reader is there, and exposes the control actions as
//! keyboard shortcuts.

pub mod app;
pub mod error;
pub mod run;
pub mod ui;

use std::time::Duration;

use mailroom_sync::{DEFAULT_MAX_LINES, DEFAULT_POLL_INTERVAL};

pub use app::{AppAction, TuiApp};
pub use error::{Result, TuiError};
pub use run::run_tui;

/// Viewer configuration.
#[derive(Debug, Clone)]
pub struct TuiConfig {
    /// Base URL of the Mailroom server, e.g. `http://127.0.0.1:8080`.
    pub server_url: String,
    pub poll_interval: Duration,
    /// Upper bound on locally accumulated log lines.
    pub log_max_lines: usize,
}

impl Default for TuiConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            log_max_lines: DEFAULT_MAX_LINES,
        }
    }
}
