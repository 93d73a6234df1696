//! Shared application state for the web server.
//!
//! [`AppState`] is wrapped in an `Arc` and shared across all request
//! handlers. Store handles are cheap path holders; every request re-reads
//! the documents from disk.

use mailroom_store::{StateDir, Stores};

use crate::WebConfig;
use crate::control::ControlChannel;
use crate::executor::ExecutorSupervisor;

/// Shared state accessible from every Axum handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Web server configuration.
    pub config: WebConfig,

    /// Handles to every coordination document under the state root.
    pub stores: Stores,

    /// The executor child, if one is running.
    pub executor: ExecutorSupervisor,

    pub control: ControlChannel,
}

impl AppState {
    pub fn new(config: WebConfig) -> Self {
        let stores = StateDir::new(&config.root).open(&config.store);
        let executor = ExecutorSupervisor::new(config.executor.clone(), stores.queue.clone());
        let control = ControlChannel::new(stores.clone(), executor.clone());
        Self {
            config,
            stores,
            executor,
            control,
        }
    }
}
