//! Per-viewer session state and the poll loop.

use std::ops::ControlFlow;
use std::time::Duration;

use mailroom_store::{StatusSnapshot, TimelineItem};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::control::{ControlAction, ControlFeedback};
use crate::log_merge::{LogBuffer, MergeOutcome};
use crate::signature::{Signature, timeline_signature};
use crate::source::SyncSource;
use crate::viewport::LogViewport;

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Connection health as seen by the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Health {
    #[default]
    Healthy,
    Degraded {
        consecutive_failures: u32,
        last_error: String,
    },
}

impl Health {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// What one tick changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    pub timeline_changed: bool,
    pub log_changed: bool,
    pub status_changed: bool,
    pub errors: Vec<String>,
}

impl PollReport {
    pub fn needs_redraw(&self) -> bool {
        self.timeline_changed || self.log_changed || self.status_changed || !self.errors.is_empty()
    }
}

/// One viewer's read-side state. Owns no store; all mutation goes through
/// the source.
pub struct SyncClient<S> {
    source: S,
    last_signature: Option<Signature>,
    timeline: Vec<TimelineItem>,
    status: Option<StatusSnapshot>,
    log: LogBuffer,
    viewport: LogViewport,
    health: Health,
    feedback: Option<ControlFeedback>,
}

impl<S: SyncSource> SyncClient<S> {
    pub fn new(source: S) -> Self {
        Self::with_log_buffer(source, LogBuffer::default())
    }

    pub fn with_log_buffer(source: S, log: LogBuffer) -> Self {
        Self {
            source,
            last_signature: None,
            timeline: Vec::new(),
            status: None,
            log,
            viewport: LogViewport::default(),
            health: Health::Healthy,
            feedback: None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn timeline(&self) -> &[TimelineItem] {
        &self.timeline
    }

    pub fn status(&self) -> Option<&StatusSnapshot> {
        self.status.as_ref()
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn viewport(&self) -> &LogViewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut LogViewport {
        &mut self.viewport
    }

    /// Resize the log pane.
    pub fn set_log_height(&mut self, height: usize) {
        let total = self.log.len();
        self.viewport.set_height(height, total);
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn feedback(&self) -> Option<&ControlFeedback> {
        self.feedback.as_ref()
    }

    pub fn last_signature(&self) -> Option<Signature> {
        self.last_signature
    }

    /// Fetch timeline and status and apply whichever succeeded. A failed
    /// fetch leaves the corresponding state as it was.
    pub async fn poll_once(&mut self) -> PollReport {
        let (timeline, status) =
            tokio::join!(self.source.fetch_timeline(), self.source.fetch_status());
        let mut report = PollReport::default();

        match timeline {
            Ok(items) => {
                let signature = timeline_signature(&items);
                if self.last_signature != Some(signature) {
                    debug!(items = items.len(), %signature, "timeline changed");
                    self.last_signature = Some(signature);
                    self.timeline = items;
                    report.timeline_changed = true;
                }
            }
            Err(e) => report.errors.push(format!("timeline: {e}")),
        }

        match status {
            Ok(snapshot) => {
                let before = self.log.len();
                let outcome = self.log.merge(&snapshot.log_tail);
                if outcome.changed() {
                    self.viewport.follow(before, self.log.len());
                    report.log_changed = true;
                }
                if outcome == MergeOutcome::Replaced {
                    debug!(lines = self.log.len(), "log buffer replaced");
                }
                report.status_changed = self
                    .status
                    .as_ref()
                    .is_none_or(|prev| status_differs(prev, &snapshot));
                self.status = Some(snapshot);
            }
            Err(e) => report.errors.push(format!("status: {e}")),
        }

        self.update_health(&report);
        report
    }

    /// Send a control action, record Done/Fail, then re-poll whatever the
    /// outcome.
    pub async fn control(&mut self, action: ControlAction) -> PollReport {
        let label = action.label();
        self.feedback = Some(match self.source.send_control(&action).await {
            Ok(reply) => ControlFeedback::Done {
                action: label,
                reply,
            },
            Err(e) => {
                warn!(action = label, error = %e, "control action failed");
                ControlFeedback::Fail {
                    action: label,
                    error: e.to_string(),
                }
            }
        });
        self.poll_once().await
    }

    /// Post a message typed by the viewer, then re-poll.
    pub async fn send_message(&mut self, text: &str) -> PollReport {
        self.feedback = Some(match self.source.post_message(text).await {
            Ok(reply) => ControlFeedback::Done {
                action: "send",
                reply,
            },
            Err(e) => ControlFeedback::Fail {
                action: "send",
                error: e.to_string(),
            },
        });
        self.poll_once().await
    }

    /// Poll every `interval` until `on_tick` breaks. Ticks never overlap; a
    /// slow tick delays the next one.
    pub async fn run<F>(&mut self, interval: Duration, mut on_tick: F)
    where
        F: FnMut(&Self, &PollReport) -> ControlFlow<()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.poll_once().await;
            if on_tick(self, &report).is_break() {
                break;
            }
        }
    }

    fn update_health(&mut self, report: &PollReport) {
        match report.errors.last() {
            None => {
                if self.health.is_degraded() {
                    debug!("sync recovered");
                }
                self.health = Health::Healthy;
            }
            Some(last) => {
                let consecutive_failures = match &self.health {
                    Health::Degraded {
                        consecutive_failures,
                        ..
                    } => consecutive_failures + 1,
                    Health::Healthy => 1,
                };
                warn!(consecutive_failures, error = %last, "poll failed");
                self.health = Health::Degraded {
                    consecutive_failures,
                    last_error: last.clone(),
                };
            }
        }
    }
}

/// Whether two snapshots differ in anything besides the log tail.
fn status_differs(a: &StatusSnapshot, b: &StatusSnapshot) -> bool {
    a.worker_phase != b.worker_phase
        || a.stale != b.stale
        || a.working.active != b.working.active
        || a.working.message_id != b.working.message_id
        || a.working.pid != b.working.pid
        || a.executor_running != b.executor_running
        || a.executor_pid != b.executor_pid
        || a.pending_ids != b.pending_ids
}
