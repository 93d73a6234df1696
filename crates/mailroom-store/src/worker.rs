//! Worker liveness record (`working.json`).
//!
//! The executor claims the single work slot with
//! [`WorkerStatusTracker::try_begin`], heartbeats while it runs, and releases
//! the slot with [`WorkerStatusTracker::finish`]. A record that claims
//! activity the OS no longer backs is reported as [`WorkerPhase::Stale`] and
//! keeps blocking new work until [`WorkerStatusTracker::force_idle`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::atomic::AtomicStore;
use crate::error::{StoreError, StoreResult};
use crate::process::is_process_alive;
use crate::types::{MessageId, now_timestamp};

/// Default number of log lines retained in `log_tail`.
pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// Default age after which a silent worker is considered hung.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(900);

/// On-disk shape of `working.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingState {
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<String>,
    /// Newest last.
    #[serde(default)]
    pub log_tail: VecDeque<String>,
}

impl WorkingState {
    fn reset_slot(&mut self) {
        self.active = false;
        self.message_id = None;
        self.pid = None;
        self.started_at = None;
        self.heartbeat = None;
    }

    fn push_log(&mut self, line: String, capacity: usize) {
        self.log_tail.push_back(line);
        while self.log_tail.len() > capacity {
            self.log_tail.pop_front();
        }
    }
}

/// Why an active record is no longer trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleReason {
    DeadProcess { pid: u32 },
    MissingPid,
    HeartbeatExpired { age_secs: u64 },
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeadProcess { pid } => write!(f, "process {pid} is not running"),
            Self::MissingPid => f.write_str("active record has no pid"),
            Self::HeartbeatExpired { age_secs } => write!(f, "no heartbeat for {age_secs}s"),
        }
    }
}

/// Derived worker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerPhase {
    Idle,
    Active,
    Stale(StaleReason),
}

impl WorkerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Stale(_) => "stale",
        }
    }

    pub fn stale_reason(&self) -> Option<&StaleReason> {
        match self {
            Self::Stale(reason) => Some(reason),
            _ => None,
        }
    }
}

/// A record together with its derived phase.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub state: WorkingState,
    pub phase: WorkerPhase,
}

impl WorkerStatus {
    /// `Err(StaleWorker)` when the record contradicts the process table.
    pub fn check(&self) -> StoreResult<()> {
        match &self.phase {
            WorkerPhase::Stale(reason) => Err(StoreError::StaleWorker {
                message_id: self.state.message_id,
                pid: self.state.pid,
                reason: reason.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Result of [`WorkerStatusTracker::try_begin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The slot was free and is now held by the caller.
    Started,
    /// A live worker holds the slot.
    Busy {
        message_id: Option<MessageId>,
        pid: Option<u32>,
    },
    /// The slot is held by a record that needs an explicit stop first.
    Stale {
        message_id: Option<MessageId>,
        reason: StaleReason,
    },
}

/// What [`WorkerStatusTracker::force_idle`] cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForcedIdle {
    pub message_id: Option<MessageId>,
    pub pid: Option<u32>,
}

/// Owner of `working.json`.
#[derive(Debug, Clone)]
pub struct WorkerStatusTracker {
    doc: AtomicStore<WorkingState>,
    log_capacity: usize,
    stale_after: Duration,
}

impl WorkerStatusTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            doc: AtomicStore::new(path),
            log_capacity: DEFAULT_LOG_CAPACITY,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn document(&self) -> &AtomicStore<WorkingState> {
        &self.doc
    }

    pub fn log_capacity(&self) -> usize {
        self.log_capacity
    }

    /// Current record and phase. Never fails; a stale record is a phase,
    /// not an error.
    pub async fn status(&self) -> WorkerStatus {
        let state = self.doc.load().await;
        let phase = evaluate(&state, self.stale_after, Utc::now());
        WorkerStatus { state, phase }
    }

    /// Claim the work slot for `message_id` if nobody holds it.
    #[instrument(skip(self))]
    pub async fn try_begin(&self, message_id: MessageId, pid: u32) -> StoreResult<BeginOutcome> {
        let stale_after = self.stale_after;
        let outcome = self
            .doc
            .update_if_changed(move |state| {
                if state.active {
                    let outcome = match evaluate(state, stale_after, Utc::now()) {
                        WorkerPhase::Stale(reason) => BeginOutcome::Stale {
                            message_id: state.message_id,
                            reason,
                        },
                        _ => BeginOutcome::Busy {
                            message_id: state.message_id,
                            pid: state.pid,
                        },
                    };
                    return Ok((outcome, false));
                }
                let now = now_timestamp();
                state.active = true;
                state.message_id = Some(message_id);
                state.pid = Some(pid);
                state.started_at = Some(now.clone());
                state.heartbeat = Some(now);
                Ok((BeginOutcome::Started, true))
            })
            .await?;
        match &outcome {
            BeginOutcome::Started => info!(message_id, pid, "worker started"),
            BeginOutcome::Busy { .. } => info!(message_id, "worker slot busy"),
            BeginOutcome::Stale { reason, .. } => {
                warn!(message_id, %reason, "worker slot held by stale record")
            }
        }
        Ok(outcome)
    }

    /// Refresh the heartbeat. Returns `false` when no worker is active.
    pub async fn heartbeat(&self) -> StoreResult<bool> {
        self.doc
            .update_if_changed(|state| {
                if !state.active {
                    return Ok((false, false));
                }
                state.heartbeat = Some(now_timestamp());
                Ok((true, true))
            })
            .await
    }

    /// Release the slot if it is held for `message_id`.
    #[instrument(skip(self))]
    pub async fn finish(&self, message_id: MessageId) -> StoreResult<bool> {
        let released = self
            .doc
            .update_if_changed(move |state| {
                if !state.active || state.message_id != Some(message_id) {
                    return Ok((false, false));
                }
                state.reset_slot();
                Ok((true, true))
            })
            .await?;
        if released {
            info!(message_id, "worker finished");
        }
        Ok(released)
    }

    /// Append lines to the log tail. Also counts as a heartbeat.
    pub async fn append_log<I, S>(&self, lines: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        if lines.is_empty() {
            return Ok(());
        }
        let capacity = self.log_capacity;
        self.doc
            .update(move |state| {
                for line in lines {
                    state.push_log(line, capacity);
                }
                if state.active {
                    state.heartbeat = Some(now_timestamp());
                }
                Ok(())
            })
            .await
    }

    pub async fn log_tail(&self) -> Vec<String> {
        self.doc.load().await.log_tail.into_iter().collect()
    }

    pub async fn clear_log(&self) -> StoreResult<()> {
        self.doc
            .update(|state| {
                state.log_tail.clear();
                Ok(())
            })
            .await?;
        info!("worker log cleared");
        Ok(())
    }

    /// Reset an active or stale record to idle. Errors with
    /// [`StoreError::AlreadyIdle`] when nothing is active.
    #[instrument(skip(self))]
    pub async fn force_idle(&self) -> StoreResult<ForcedIdle> {
        let forced = self
            .doc
            .update_if_changed(|state| {
                if !state.active {
                    return Err(StoreError::AlreadyIdle);
                }
                let forced = ForcedIdle {
                    message_id: state.message_id,
                    pid: state.pid,
                };
                state.reset_slot();
                Ok((forced, true))
            })
            .await?;
        info!(message_id = ?forced.message_id, pid = ?forced.pid, "worker forced idle");
        Ok(forced)
    }
}

/// Derive the phase of a record at `now`.
fn evaluate(state: &WorkingState, stale_after: Duration, now: DateTime<Utc>) -> WorkerPhase {
    if !state.active {
        return WorkerPhase::Idle;
    }
    let Some(pid) = state.pid else {
        return WorkerPhase::Stale(StaleReason::MissingPid);
    };
    if !is_process_alive(pid) {
        return WorkerPhase::Stale(StaleReason::DeadProcess { pid });
    }
    let last_seen = state
        .heartbeat
        .as_deref()
        .or(state.started_at.as_deref())
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc));
    if let Some(last_seen) = last_seen {
        let age = (now - last_seen).to_std().unwrap_or_default();
        if age > stale_after {
            return WorkerPhase::Stale(StaleReason::HeartbeatExpired {
                age_secs: age.as_secs(),
            });
        }
    }
    WorkerPhase::Active
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const DEAD_PID: u32 = 999_999_999;

    fn tracker_in(dir: &std::path::Path) -> WorkerStatusTracker {
        WorkerStatusTracker::new(dir.join("working.json"))
    }

    fn me() -> u32 {
        std::process::id()
    }

    #[tokio::test]
    async fn begin_then_finish_cycles_back_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        assert_eq!(tracker.status().await.phase, WorkerPhase::Idle);

        assert_eq!(tracker.try_begin(7, me()).await.unwrap(), BeginOutcome::Started);
        let status = tracker.status().await;
        assert_eq!(status.phase, WorkerPhase::Active);
        assert_eq!(status.state.message_id, Some(7));
        assert!(status.state.heartbeat.is_some());

        assert!(!tracker.finish(8).await.unwrap());
        assert!(tracker.finish(7).await.unwrap());
        let status = tracker.status().await;
        assert_eq!(status.phase, WorkerPhase::Idle);
        assert_eq!(status.state.pid, None);
    }

    #[tokio::test]
    async fn second_begin_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.try_begin(1, me()).await.unwrap();
        let outcome = tracker.try_begin(2, me()).await.unwrap();
        assert_eq!(
            outcome,
            BeginOutcome::Busy {
                message_id: Some(1),
                pid: Some(me())
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dead_pid_is_stale_until_forced_idle() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker
            .document()
            .save(WorkingState {
                active: true,
                message_id: Some(3),
                pid: Some(DEAD_PID),
                ..Default::default()
            })
            .await
            .unwrap();

        let status = tracker.status().await;
        assert_eq!(
            status.phase,
            WorkerPhase::Stale(StaleReason::DeadProcess { pid: DEAD_PID })
        );
        assert!(matches!(status.check(), Err(StoreError::StaleWorker { .. })));

        let blocked = tracker.try_begin(4, me()).await.unwrap();
        assert!(matches!(blocked, BeginOutcome::Stale { message_id: Some(3), .. }));
        // Reading never clears it.
        assert!(tracker.status().await.state.active);

        let forced = tracker.force_idle().await.unwrap();
        assert_eq!(forced.pid, Some(DEAD_PID));
        let status = tracker.status().await;
        assert_eq!(status.phase, WorkerPhase::Idle);
        assert!(!status.state.active);
    }

    #[tokio::test]
    async fn active_without_pid_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker
            .document()
            .save(WorkingState {
                active: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            tracker.status().await.phase,
            WorkerPhase::Stale(StaleReason::MissingPid)
        );
    }

    #[test]
    fn old_heartbeat_expires() {
        let state = WorkingState {
            active: true,
            message_id: Some(1),
            pid: Some(std::process::id()),
            heartbeat: Some("2020-01-01T00:00:00.000000Z".into()),
            ..Default::default()
        };
        let phase = evaluate(&state, DEFAULT_STALE_AFTER, Utc::now());
        assert!(matches!(
            phase,
            WorkerPhase::Stale(StaleReason::HeartbeatExpired { .. })
        ));
    }

    #[tokio::test]
    async fn force_idle_on_idle_errors() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        assert!(matches!(
            tracker.force_idle().await,
            Err(StoreError::AlreadyIdle)
        ));
    }

    #[tokio::test]
    async fn log_tail_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path()).with_log_capacity(3);
        tracker.append_log(["a", "b"]).await.unwrap();
        tracker.append_log(["c", "d", "e"]).await.unwrap();
        assert_eq!(tracker.log_tail().await, vec!["c", "d", "e"]);

        tracker.clear_log().await.unwrap();
        assert!(tracker.log_tail().await.is_empty());
    }

    #[tokio::test]
    async fn heartbeat_requires_active_worker() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        assert!(!tracker.heartbeat().await.unwrap());
        tracker.try_begin(1, me()).await.unwrap();
        assert!(tracker.heartbeat().await.unwrap());
    }
}
