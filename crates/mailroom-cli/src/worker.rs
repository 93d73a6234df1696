//! Built-in echo executor.
//!
//! One cycle claims the worker slot for the oldest pending message, replies
//! through the outbox, marks the message processed and releases the slot.
//! It stands in for a real executor when exercising the system end to end.

use anyhow::{Context, Result};
use mailroom_store::{BeginOutcome, Message, MessageId, MessageKind, Payload, StaleReason, Stores};
use tracing::{info, warn};

/// How a message is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Any message containing the word "ping" gets a pong.
    Ping,
    /// Photos and documents are acknowledged by path.
    Attachment,
    /// Everything else is echoed back.
    Echo,
}

impl Route {
    pub fn for_message(message: &Message) -> Self {
        if message.kind != MessageKind::Text {
            return Self::Attachment;
        }
        let text = message.text.as_deref().unwrap_or_default();
        let pings = text
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word.eq_ignore_ascii_case("ping"));
        if pings { Self::Ping } else { Self::Echo }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Attachment => "attachment",
            Self::Echo => "echo",
        }
    }

    pub fn reply(self, message: &Message) -> Payload {
        match self {
            Self::Ping => Payload::text("pong"),
            Self::Attachment => Payload::text(format!(
                "received {} {}",
                message.kind.as_str(),
                message.file_path.as_deref().unwrap_or_default()
            )),
            Self::Echo => Payload::text(format!(
                "echo: {}",
                message.text.as_deref().unwrap_or_default().trim()
            )),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing pending.
    Idle,
    Handled { message_id: MessageId, route: Route },
    /// The message was finished by someone else before the slot was claimed.
    Skipped { message_id: MessageId },
    /// Another worker holds the slot.
    Busy { message_id: Option<MessageId> },
    /// A stale record holds the slot; it must be stopped first.
    Stale { reason: StaleReason },
}

/// Handle the oldest pending message, recording `pid` as the worker.
pub async fn run_cycle(stores: &Stores, pid: u32) -> Result<CycleOutcome> {
    let Some(message) = stores.queue.list_unprocessed().await.into_iter().next() else {
        return Ok(CycleOutcome::Idle);
    };
    claim_and_handle(stores, message.id, pid).await
}

/// Claim the worker slot for `message_id`, then handle the message as it
/// reads under the claim.
pub async fn claim_and_handle(
    stores: &Stores,
    message_id: MessageId,
    pid: u32,
) -> Result<CycleOutcome> {
    match stores.worker.try_begin(message_id, pid).await? {
        BeginOutcome::Started => {}
        BeginOutcome::Busy { message_id, .. } => return Ok(CycleOutcome::Busy { message_id }),
        BeginOutcome::Stale { reason, .. } => return Ok(CycleOutcome::Stale { reason }),
    }

    // The selection was made before the claim; another worker may have
    // finished the message in between.
    let message = match stores.queue.get(message_id).await {
        Some(message) if !message.processed => message,
        _ => {
            stores.worker.finish(message_id).await?;
            info!(message_id, "message already handled, skipping");
            return Ok(CycleOutcome::Skipped { message_id });
        }
    };

    let result = handle(stores, &message).await;
    // Release the slot even when handling failed.
    if let Err(e) = stores.worker.finish(message.id).await {
        warn!(message_id = message.id, error = %e, "failed to release worker slot");
    }
    let route = result?;
    Ok(CycleOutcome::Handled {
        message_id: message.id,
        route,
    })
}

async fn handle(stores: &Stores, message: &Message) -> Result<Route> {
    let route = Route::for_message(message);
    stores
        .worker
        .append_log([
            format!("[work] picked #{}", message.id),
            format!("[work] route: {}", route.as_str()),
        ])
        .await?;

    let entry = stores
        .outbox
        .append(Some(message.id), route.reply(message), message.chat_id)
        .await
        .context("failed to write reply")?;
    stores.queue.mark_processed(message.id).await?;

    let instruction = message
        .text
        .as_deref()
        .or(message.caption.as_deref())
        .or(message.file_path.as_deref())
        .unwrap_or_default();
    if !instruction.trim().is_empty() {
        let summary = entry.text.clone().unwrap_or_default();
        stores
            .index
            .record(message.id, instruction, &summary, Vec::new())
            .await?;
    }

    stores
        .worker
        .append_log([format!("[work] done #{}", message.id)])
        .await?;
    info!(message_id = message.id, route = route.as_str(), "message handled");
    Ok(route)
}

#[cfg(test)]
mod tests {
    use mailroom_store::{NewMessage, StateDir, StoreOptions, WorkerPhase, WorkingState};

    use super::*;

    fn open(dir: &tempfile::TempDir) -> Stores {
        StateDir::new(dir.path()).open(&StoreOptions::default())
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open(&dir);
        let msg = stores
            .queue
            .enqueue(NewMessage::text("Web control test ping"))
            .await
            .unwrap();

        let outcome = run_cycle(&stores, std::process::id()).await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Handled {
                message_id: msg.id,
                route: Route::Ping
            }
        );

        let replies = stores.outbox.list_for(msg.id).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].text.as_deref(), Some("pong"));
        assert!(stores.queue.pending_ids().await.is_empty());
        assert_eq!(stores.worker.status().await.phase, WorkerPhase::Idle);

        let log = stores.worker.log_tail().await;
        assert_eq!(log.last().map(String::as_str), Some("[work] done #1"));
        assert_eq!(stores.index.recent(1).await[0].summary, "pong");
    }

    #[tokio::test]
    async fn messages_are_handled_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open(&dir);
        stores.queue.enqueue(NewMessage::text("first")).await.unwrap();
        stores.queue.enqueue(NewMessage::text("second")).await.unwrap();

        let pid = std::process::id();
        assert!(matches!(
            run_cycle(&stores, pid).await.unwrap(),
            CycleOutcome::Handled { message_id: 1, route: Route::Echo }
        ));
        assert!(matches!(
            run_cycle(&stores, pid).await.unwrap(),
            CycleOutcome::Handled { message_id: 2, .. }
        ));
        assert_eq!(run_cycle(&stores, pid).await.unwrap(), CycleOutcome::Idle);

        let texts: Vec<String> = stores
            .outbox
            .list()
            .await
            .into_iter()
            .filter_map(|e| e.text)
            .collect();
        assert_eq!(texts, ["echo: first", "echo: second"]);
    }

    #[tokio::test]
    async fn stale_record_blocks_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open(&dir);
        stores.queue.enqueue(NewMessage::text("job")).await.unwrap();
        stores
            .worker
            .document()
            .save(WorkingState {
                active: true,
                message_id: Some(99),
                pid: None,
                ..Default::default()
            })
            .await
            .unwrap();

        let outcome = run_cycle(&stores, std::process::id()).await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Stale {
                reason: StaleReason::MissingPid
            }
        );
        assert_eq!(stores.queue.pending_ids().await, vec![1]);
    }

    #[tokio::test]
    async fn message_finished_before_the_claim_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open(&dir);
        stores.queue.enqueue(NewMessage::text("ping")).await.unwrap();

        let selected = stores.queue.list_unprocessed().await[0].id;
        // Another worker completes it after selection.
        stores.queue.mark_processed(selected).await.unwrap();

        let outcome = claim_and_handle(&stores, selected, std::process::id())
            .await
            .unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped { message_id: selected });
        assert!(stores.outbox.list().await.is_empty());
        assert_eq!(stores.worker.status().await.phase, WorkerPhase::Idle);
    }

    #[tokio::test]
    async fn live_worker_makes_the_cycle_busy() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open(&dir);
        stores.queue.enqueue(NewMessage::text("job")).await.unwrap();
        stores.worker.try_begin(7, std::process::id()).await.unwrap();

        let outcome = run_cycle(&stores, std::process::id()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Busy { message_id: Some(7) });
    }

    #[test]
    fn routes() {
        let mut message = Message {
            id: 1,
            direction: mailroom_store::Direction::In,
            kind: MessageKind::Text,
            text: Some("PING?".into()),
            file_path: None,
            caption: None,
            chat_id: None,
            user: None,
            timestamp: String::new(),
            processed: false,
        };
        assert_eq!(Route::for_message(&message), Route::Ping);

        message.text = Some("shipping update".into());
        assert_eq!(Route::for_message(&message), Route::Echo);

        message.kind = MessageKind::Photo;
        message.file_path = Some("in/cat.png".into());
        assert_eq!(Route::for_message(&message), Route::Attachment);
        assert_eq!(
            Route::Attachment.reply(&message),
            Payload::text("received photo in/cat.png")
        );
    }
}
