//! Append-only outbound mailbox.
//!
//! Only the executor writes here. Entries are never edited; the only
//! removal is retention trimming of the oldest entries and an explicit
//! [`OutboxStore::clear`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::atomic::AtomicStore;
use crate::error::StoreResult;
use crate::types::{MessageId, OutboxEntry, Payload, now_timestamp};

/// On-disk shape of `web_outbox.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboxDocument {
    #[serde(default)]
    pub messages: Vec<OutboxEntry>,
    #[serde(default)]
    pub last_entry_id: MessageId,
}

/// The outbound document.
#[derive(Debug, Clone)]
pub struct OutboxStore {
    doc: AtomicStore<OutboxDocument>,
    retention: Option<usize>,
}

impl OutboxStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            doc: AtomicStore::new(path),
            retention: None,
        }
    }

    /// Keep at most `max_entries` entries, dropping the oldest first.
    pub fn with_retention(mut self, max_entries: usize) -> Self {
        self.retention = Some(max_entries.max(1));
        self
    }

    pub fn document(&self) -> &AtomicStore<OutboxDocument> {
        &self.doc
    }

    /// Append an entry, optionally tied to the queue message it answers.
    #[instrument(skip(self, payload), fields(kind = payload.kind().as_str()))]
    pub async fn append(
        &self,
        reply_to: Option<MessageId>,
        payload: Payload,
        chat_id: Option<i64>,
    ) -> StoreResult<OutboxEntry> {
        payload.validate()?;
        let retention = self.retention;
        let entry = self
            .doc
            .update(move |doc| {
                let max_seen = doc.messages.iter().map(|e| e.id).max().unwrap_or(0);
                doc.last_entry_id = doc.last_entry_id.max(max_seen) + 1;
                let entry =
                    OutboxEntry::build(doc.last_entry_id, reply_to, payload, chat_id, now_timestamp());
                doc.messages.push(entry.clone());
                if let Some(max) = retention
                    && doc.messages.len() > max
                {
                    let excess = doc.messages.len() - max;
                    doc.messages.drain(..excess);
                }
                Ok(entry)
            })
            .await?;
        info!(entry_id = entry.id, reply_to = ?entry.reply_to, "outbox entry appended");
        Ok(entry)
    }

    /// The full log in append order.
    pub async fn list(&self) -> Vec<OutboxEntry> {
        self.doc.load().await.messages
    }

    /// Entries reporting on a specific queue message.
    pub async fn list_for(&self, message_id: MessageId) -> Vec<OutboxEntry> {
        self.list()
            .await
            .into_iter()
            .filter(|e| e.reply_to == Some(message_id))
            .collect()
    }

    /// Drop every entry. The id high-water mark is kept.
    pub async fn clear(&self) -> StoreResult<()> {
        self.doc
            .update(|doc| {
                doc.messages.clear();
                Ok(())
            })
            .await?;
        info!("outbox cleared");
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
