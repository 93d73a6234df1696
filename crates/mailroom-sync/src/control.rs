//! Viewer-side control actions and their feedback.

use serde_json::{Value, json};

/// Text sent by [`ControlAction::TestMessage`] when none is given.
pub const DEFAULT_TEST_MESSAGE: &str = "Web control test ping";

/// An imperative request sent to the control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Ask the executor to look at the queue now.
    Retrigger,
    /// Enqueue a synthetic message.
    TestMessage(Option<String>),
    /// Stop the worker and reset its liveness record.
    StopWorker,
    /// Clear the persisted worker log.
    ClearLog,
}

impl ControlAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Retrigger => "retrigger",
            Self::TestMessage(_) => "test-message",
            Self::StopWorker => "stop-worker",
            Self::ClearLog => "clear-log",
        }
    }

    /// Request path relative to the server root.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Retrigger => "/api/control/retrigger",
            Self::TestMessage(_) => "/api/control/test-message",
            Self::StopWorker => "/api/control/stop-worker",
            Self::ClearLog => "/api/debug/clear",
        }
    }

    /// JSON request body.
    pub fn body(&self) -> Value {
        match self {
            Self::TestMessage(Some(text)) => json!({ "text": text }),
            _ => json!({}),
        }
    }
}

/// Transient result indicator for the last control action.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFeedback {
    Done { action: &'static str, reply: Value },
    Fail { action: &'static str, error: String },
}

impl ControlFeedback {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// Short status line, e.g. `stop-worker: Done (not_running)`.
    pub fn summary(&self) -> String {
        match self {
            Self::Done { action, reply } => {
                let reason = reply
                    .pointer("/result/reason")
                    .or_else(|| reply.pointer("/trigger/reason"))
                    .and_then(Value::as_str);
                match reason {
                    Some(reason) => format!("{action}: Done ({reason})"),
                    None => format!("{action}: Done"),
                }
            }
            Self::Fail { action, error } => format!("{action}: Fail ({error})"),
        }
    }
}
