//! Inbound message queue.
//!
//! Producers append with [`QueueStore::enqueue`]; the executor reads
//! [`QueueStore::list_unprocessed`] and flips items with
//! [`QueueStore::mark_processed`]. The at-most-one-in-flight policy lives in
//! the worker tracker, not here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::atomic::AtomicStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{Message, MessageId, NewMessage, now_timestamp};

/// On-disk shape of `messages.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueDocument {
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Highest id ever issued by this document.
    #[serde(default)]
    pub last_message_id: MessageId,
    /// Offset of the last update pulled from an external transport.
    #[serde(default)]
    pub last_update_id: i64,
}

impl QueueDocument {
    fn next_id(&mut self) -> MessageId {
        // Files written by other producers may carry ids past our mark.
        let max_seen = self.messages.iter().map(|m| m.id).max().unwrap_or(0);
        self.last_message_id = self.last_message_id.max(max_seen) + 1;
        self.last_message_id
    }
}

/// What [`QueueStore::mark_processed`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The message moved from unprocessed to processed.
    Marked,
    /// The message was already processed; nothing changed.
    AlreadyProcessed,
}

/// The inbound queue document.
#[derive(Debug, Clone)]
pub struct QueueStore {
    doc: AtomicStore<QueueDocument>,
}

impl QueueStore {
    /// Create a queue backed by the document at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            doc: AtomicStore::new(path),
        }
    }

    /// Build from an already configured document handle.
    pub fn from_store(doc: AtomicStore<QueueDocument>) -> Self {
        Self { doc }
    }

    /// The underlying document handle.
    pub fn document(&self) -> &AtomicStore<QueueDocument> {
        &self.doc
    }

    /// Append a new unprocessed message with a fresh id and server timestamp.
    #[instrument(skip(self, new), fields(kind = new.payload.kind().as_str()))]
    pub async fn enqueue(&self, new: NewMessage) -> StoreResult<Message> {
        new.payload.validate()?;
        let msg = self
            .doc
            .update(move |doc| {
                let id = doc.next_id();
                let msg = Message::build(id, new, now_timestamp());
                doc.messages.push(msg.clone());
                Ok(msg)
            })
            .await?;
        info!(message_id = msg.id, "message enqueued");
        Ok(msg)
    }

    /// Every message in insertion order.
    pub async fn list(&self) -> Vec<Message> {
        self.doc.load().await.messages
    }

    /// Unprocessed messages, oldest first.
    pub async fn list_unprocessed(&self) -> Vec<Message> {
        self.doc
            .load()
            .await
            .messages
            .into_iter()
            .filter(|m| !m.processed)
            .collect()
    }

    /// Ids of unprocessed messages, oldest first.
    pub async fn pending_ids(&self) -> Vec<MessageId> {
        self.list_unprocessed().await.iter().map(|m| m.id).collect()
    }

    /// Fetch a single message.
    pub async fn get(&self, id: MessageId) -> Option<Message> {
        self.doc
            .load()
            .await
            .messages
            .into_iter()
            .find(|m| m.id == id)
    }

    /// Mark a message processed. Idempotent; unknown ids are `NotFound`.
    #[instrument(skip(self))]
    pub async fn mark_processed(&self, id: MessageId) -> StoreResult<MarkOutcome> {
        let outcome = self
            .doc
            .update(move |doc| {
                let msg = doc
                    .messages
                    .iter_mut()
                    .find(|m| m.id == id)
                    .ok_or_else(|| StoreError::not_found("message", id))?;
                if msg.processed {
                    return Ok(MarkOutcome::AlreadyProcessed);
                }
                msg.processed = true;
                Ok(MarkOutcome::Marked)
            })
            .await?;
        debug!(message_id = id, ?outcome, "mark processed");
        Ok(outcome)
    }

    /// Record the latest transport update offset (used by external pollers).
    pub async fn set_last_update_id(&self, update_id: i64) -> StoreResult<()> {
        self.doc
            .update(move |doc| {
                doc.last_update_id = doc.last_update_id.max(update_id);
                Ok(())
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
