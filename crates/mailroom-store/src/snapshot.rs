//! JSON bodies shared by the HTTP surface and its clients.

use serde::{Deserialize, Serialize};

use crate::layout::Stores;
use crate::types::{MessageId, TimelineItem};
use crate::worker::{StaleReason, WorkingState};

/// Body of `GET /api/messages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineResponse {
    #[serde(default)]
    pub messages: Vec<TimelineItem>,
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub working: WorkingState,
    /// `idle`, `active` or `stale`.
    #[serde(default)]
    pub worker_phase: String,
    #[serde(default)]
    pub stale: Option<StaleReason>,
    #[serde(default)]
    pub executor_running: bool,
    #[serde(default)]
    pub executor_pid: Option<u32>,
    #[serde(default)]
    pub pending_count: usize,
    #[serde(default)]
    pub pending_ids: Vec<MessageId>,
    #[serde(default)]
    pub log_tail: Vec<String>,
}

impl StatusSnapshot {
    /// Read the worker record and pending queue into one snapshot.
    pub async fn collect(stores: &Stores, executor_running: bool, executor_pid: Option<u32>) -> Self {
        let status = stores.worker.status().await;
        let pending_ids = stores.queue.pending_ids().await;
        let log_tail = status.state.log_tail.iter().cloned().collect();
        Self {
            worker_phase: status.phase.as_str().to_owned(),
            stale: status.phase.stale_reason().cloned(),
            working: status.state,
            executor_running,
            executor_pid,
            pending_count: pending_ids.len(),
            pending_ids,
            log_tail,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale.is_some()
    }
}
