//! # mailroom-sync
//!
//! Client side of the Mailroom polling protocol.
//!
//! A [`SyncClient`] owns one viewer's session: the last rendered timeline
//! signature, a bounded log buffer fed by overlap merge, an autoscroll
//! viewport and a health indicator. It talks to the server through a
//! [`SyncSource`]; [`HttpSource`] is the production implementation.
//!
//! ```ignore
//! use mailroom_sync::{HttpSource, SyncClient, DEFAULT_POLL_INTERVAL};
//!
//! let mut client = SyncClient::new(HttpSource::new("http://127.0.0.1:8080"));
//! client.run(DEFAULT_POLL_INTERVAL, |client, report| {
//!     if report.needs_redraw() { /* render */ }
//!     std::ops::ControlFlow::Continue(())
//! }).await;
//! ```

pub mod client;
pub mod control;
pub mod error;
pub mod log_merge;
pub mod signature;
pub mod source;
pub mod viewport;

pub use client::{DEFAULT_POLL_INTERVAL, Health, PollReport, SyncClient};
pub use control::{ControlAction, ControlFeedback, DEFAULT_TEST_MESSAGE};
pub use error::{SyncError, SyncResult};
pub use log_merge::{DEFAULT_MAX_LINES, LogBuffer, MergeOutcome, find_overlap};
pub use signature::{Signature, timeline_signature};
pub use source::{HttpSource, SyncSource};
pub use viewport::LogViewport;
