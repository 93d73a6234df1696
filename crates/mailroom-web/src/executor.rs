//! Supervision of the out-of-band executor process.
//!
//! At most one executor child runs at a time. A watcher task waits on it;
//! when it exits cleanly and the queue still has pending messages, the
//! watcher starts the next run. A failed run is never restarted
//! automatically so a broken executor cannot spin.

use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use mailroom_store::QueueStore;
use mailroom_store::process::terminate;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{info, warn};

/// Which transport the executor reports to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Channel {
    /// This server's queue and outbox.
    #[default]
    WebMock,
    /// A live external messenger.
    Telegram,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebMock => "webmock",
            Self::Telegram => "telegram",
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webmock" | "web" | "mock" => Ok(Self::WebMock),
            "telegram" => Ok(Self::Telegram),
            other => Err(format!("unknown message channel: {other}")),
        }
    }
}

/// Who decides when the executor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// The server spawns the executor whenever work arrives.
    #[default]
    SelfTriggered,
    /// Something else (cron, a supervisor) runs the executor; the server
    /// never spawns it.
    External,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelfTriggered => "webmock",
            Self::External => "external",
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webmock" | "self" | "self_triggered" | "self-triggered" => Ok(Self::SelfTriggered),
            "external" | "scheduler" | "cron" => Ok(Self::External),
            other => Err(format!("unknown run mode: {other}")),
        }
    }
}

/// How to launch the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Program that runs the script, e.g. `bash`.
    pub interpreter: String,
    /// Script path, relative to `workdir` unless absolute.
    pub script: PathBuf,
    pub workdir: PathBuf,
    pub channel: Channel,
    pub run_mode: RunMode,
    /// Time between SIGTERM and a hard kill.
    pub stop_grace: Duration,
    /// Time to wait for the process to disappear after a hard kill.
    pub kill_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            interpreter: "bash".into(),
            script: PathBuf::from("executor.sh"),
            workdir: PathBuf::from("."),
            channel: Channel::WebMock,
            run_mode: RunMode::SelfTriggered,
            stop_grace: Duration::from_secs(4),
            kill_grace: Duration::from_secs(2),
        }
    }
}

impl ExecutorConfig {
    fn script_path(&self) -> PathBuf {
        if self.script.is_absolute() {
            self.script.clone()
        } else {
            self.workdir.join(&self.script)
        }
    }
}

/// Acknowledgment of a trigger request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    pub ok: bool,
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TriggerReport {
    fn started(pid: u32) -> Self {
        Self {
            ok: true,
            triggered: true,
            pid: Some(pid),
            reason: None,
            error: None,
        }
    }

    fn skipped(reason: &'static str) -> Self {
        Self {
            ok: true,
            triggered: false,
            pid: None,
            reason: Some(reason),
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            triggered: false,
            pid: None,
            reason: None,
            error: Some(error),
        }
    }
}

/// Acknowledgment of a stop request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub ok: bool,
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

struct Running {
    pid: u32,
    generation: u64,
    stopping: bool,
    kill: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<bool>,
}

#[derive(Default)]
struct Slot {
    running: Option<Running>,
    generation: u64,
}

/// Owns the (at most one) executor child.
#[derive(Clone)]
pub struct ExecutorSupervisor {
    config: Arc<ExecutorConfig>,
    queue: QueueStore,
    slot: Arc<Mutex<Slot>>,
}

impl std::fmt::Debug for ExecutorSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorSupervisor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExecutorSupervisor {
    pub fn new(config: ExecutorConfig, queue: QueueStore) -> Self {
        Self {
            config: Arc::new(config),
            queue,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Pid of the running executor, if any.
    pub async fn running_pid(&self) -> Option<u32> {
        let slot = self.slot.lock().await;
        slot.running
            .as_ref()
            .filter(|r| !*r.exited.borrow())
            .map(|r| r.pid)
    }

    /// Start the executor unless it is already running.
    pub async fn trigger(&self) -> TriggerReport {
        if self.config.run_mode == RunMode::External {
            return TriggerReport::skipped("external_scheduler");
        }
        let mut slot = self.slot.lock().await;
        if slot.running.as_ref().is_some_and(|r| !*r.exited.borrow()) {
            return TriggerReport::skipped("already_running");
        }
        self.spawn_locked(&mut slot)
    }

    /// Stop the running executor: SIGTERM, wait `stop_grace`, then kill.
    pub async fn stop(&self) -> StopReport {
        let (pid, mut exited, kill) = {
            let mut slot = self.slot.lock().await;
            match slot.running.as_mut() {
                Some(running) if !*running.exited.borrow() => {
                    running.stopping = true;
                    (running.pid, running.exited.clone(), running.kill.take())
                }
                _ => {
                    slot.running = None;
                    return StopReport {
                        ok: true,
                        stopped: false,
                        pid: None,
                        reason: Some("not_running"),
                    };
                }
            }
        };

        info!(pid, "stopping executor");
        let mut gone = false;
        if terminate(pid) {
            gone = tokio::time::timeout(self.config.stop_grace, exited.wait_for(|done| *done))
                .await
                .is_ok();
        }
        if !gone {
            warn!(pid, "executor ignored SIGTERM, killing");
            if let Some(kill) = kill {
                let _ = kill.send(());
            }
            gone = tokio::time::timeout(self.config.kill_grace, exited.wait_for(|done| *done))
                .await
                .is_ok();
        }

        StopReport {
            ok: gone,
            stopped: gone,
            pid: Some(pid),
            reason: (!gone).then_some("still_running"),
        }
    }

    fn spawn_locked(&self, slot: &mut Slot) -> TriggerReport {
        let script = self.config.script_path();
        if !script.is_file() {
            warn!(script = %script.display(), "executor script not found");
            return TriggerReport::failed(format!("{} not found", script.display()));
        }

        let mut command = Command::new(&self.config.interpreter);
        command
            .arg(&script)
            .current_dir(&self.config.workdir)
            .env("MESSAGE_CHANNEL", self.config.channel.as_str())
            .env("RUN_MODE", self.config.run_mode.as_str())
            .stdin(Stdio::null());

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "failed to spawn executor");
                return TriggerReport::failed(e.to_string());
            }
        };
        let Some(pid) = child.id() else {
            return TriggerReport::failed("executor exited before it could be tracked".into());
        };

        slot.generation += 1;
        let generation = slot.generation;
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);
        slot.running = Some(Running {
            pid,
            generation,
            stopping: false,
            kill: Some(kill_tx),
            exited: exited_rx,
        });

        info!(pid, generation, "executor spawned");
        tokio::spawn(self.clone().watch(child, generation, kill_rx, exited_tx));
        TriggerReport::started(pid)
    }

    async fn watch(
        self,
        mut child: tokio::process::Child,
        generation: u64,
        kill_rx: oneshot::Receiver<()>,
        exited_tx: watch::Sender<bool>,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            Ok(()) = kill_rx => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill executor");
                }
                child.wait().await
            }
        };
        let success = status.as_ref().is_ok_and(|s| s.success());
        info!(generation, ?status, "executor exited");
        let _ = exited_tx.send(true);

        let mut slot = self.slot.lock().await;
        let stopping = match &slot.running {
            Some(r) if r.generation == generation => {
                let stopping = r.stopping;
                slot.running = None;
                stopping
            }
            _ => return,
        };
        if stopping || !success {
            return;
        }
        drop(slot);

        if self.queue.pending_ids().await.is_empty() {
            return;
        }
        let mut slot = self.slot.lock().await;
        if slot.running.is_some() {
            return;
        }
        let report = self.spawn_locked(&mut slot);
        info!(?report, "executor respawned for pending work");
    }
}
