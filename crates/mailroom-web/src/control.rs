//! Imperative control actions exposed over HTTP.

use mailroom_store::process::{is_process_alive, terminate};
use mailroom_store::{ForcedIdle, Message, NewMessage, StoreError, StoreResult, Stores, TimelineItem};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::executor::{ExecutorSupervisor, StopReport, TriggerReport};

/// Chat id attributed to messages typed into the web viewer.
pub const WEB_CHAT_ID: i64 = 10001;
pub const WEB_USER: &str = "Web User";
pub const CONTROL_USER: &str = "Web Control";
pub const DEFAULT_TEST_TEXT: &str = "Web control test ping";

/// Outcome of [`ControlChannel::stop_worker`].
#[derive(Debug, Clone, Serialize)]
pub struct StopWorkerReport {
    pub ok: bool,
    pub stopped: bool,
    /// A recorded worker outside the supervised executor was sent SIGTERM.
    pub worker_signalled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub executor: StopReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_reset: Option<ForcedIdle>,
}

/// A message accepted by [`ControlChannel::submit`] plus the trigger result.
#[derive(Debug, Clone, Serialize)]
pub struct Submitted {
    pub message: Message,
    pub trigger: TriggerReport,
}

#[derive(Debug, Clone)]
pub struct ControlChannel {
    stores: Stores,
    executor: ExecutorSupervisor,
}

impl ControlChannel {
    pub fn new(stores: Stores, executor: ExecutorSupervisor) -> Self {
        Self { stores, executor }
    }

    /// Wake the executor out of band. Never touches the queue.
    pub async fn retrigger(&self) -> TriggerReport {
        self.executor.trigger().await
    }

    /// Enqueue a message, record it in history, then wake the executor.
    #[instrument(skip(self, new))]
    pub async fn submit(&self, new: NewMessage) -> StoreResult<Submitted> {
        let message = self.stores.queue.enqueue(new).await?;
        if let Err(e) = self.stores.history.record(TimelineItem::from(&message)).await {
            // The next merge picks the message up from the queue anyway.
            warn!(message_id = message.id, error = %e, "history record failed");
        }
        let trigger = self.executor.trigger().await;
        Ok(Submitted { message, trigger })
    }

    /// Enqueue a synthetic message. Empty or missing text uses the default
    /// ping.
    pub async fn inject_test_message(
        &self,
        text: Option<String>,
        chat_id: Option<i64>,
        user: Option<String>,
    ) -> StoreResult<Submitted> {
        let text = text
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TEST_TEXT.to_owned());
        let new = NewMessage::text(text)
            .with_chat(chat_id.unwrap_or(WEB_CHAT_ID))
            .with_user(user.unwrap_or_else(|| CONTROL_USER.to_owned()));
        self.submit(new).await
    }

    /// Stop the supervised executor and reset the liveness record.
    ///
    /// A recorded worker pid that is still alive and is not the executor
    /// itself (nor this process) is sent SIGTERM as well.
    #[instrument(skip(self))]
    pub async fn stop_worker(&self) -> StoreResult<StopWorkerReport> {
        let executor = self.executor.stop().await;

        let worker_reset = match self.stores.worker.force_idle().await {
            Ok(forced) => Some(forced),
            Err(StoreError::AlreadyIdle) => None,
            Err(e) => return Err(e),
        };

        let worker_signalled = match worker_reset.as_ref().and_then(|f| f.pid) {
            Some(pid)
                if Some(pid) != executor.pid
                    && pid != std::process::id()
                    && is_process_alive(pid) =>
            {
                let signalled = terminate(pid);
                info!(pid, signalled, "terminated recorded worker process");
                signalled
            }
            _ => false,
        };

        let stopped = executor.stopped || worker_reset.is_some();
        Ok(StopWorkerReport {
            ok: executor.ok,
            stopped,
            worker_signalled,
            pid: executor
                .pid
                .or(worker_reset.as_ref().and_then(|f| f.pid)),
            reason: (!stopped).then_some("not_running"),
            executor,
            worker_reset,
        })
    }

    pub async fn clear_log(&self) -> StoreResult<()> {
        self.stores.worker.clear_log().await
    }

    /// Clear the outbox. History keeps everything already merged.
    pub async fn reset(&self) -> StoreResult<()> {
        self.stores.outbox.clear().await
    }
}
