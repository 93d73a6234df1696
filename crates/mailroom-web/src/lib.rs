//! HTTP surface for Mailroom.
//!
//! This crate serves the coordination state to viewers and accepts control
//! actions. It includes:
//!
//! - A JSON API over the queue, merged timeline, worker status and artifacts.
//! - The [`ControlChannel`] (retrigger, test message, stop worker).
//! - The [`ExecutorSupervisor`] that spawns and restarts the executor.

pub mod api;
pub mod control;
pub mod executor;
pub mod server;
pub mod state;

use std::path::PathBuf;

use mailroom_store::StoreOptions;

pub use control::ControlChannel;
pub use executor::{Channel, ExecutorConfig, ExecutorSupervisor, RunMode};
pub use server::{WebServer, router};
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
    /// State root holding the JSON documents and artifacts.
    pub root: PathBuf,
    pub executor: ExecutorConfig,
    pub store: StoreOptions,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 8080,
            root: PathBuf::from("."),
            executor: ExecutorConfig::default(),
            store: StoreOptions::default(),
        }
    }
}
