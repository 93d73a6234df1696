//! Keyword index of completed tasks (`index.json`).
//!
//! Executors record what an instruction was and how it ended so later
//! instructions can look up related past work.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::atomic::AtomicStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{MessageId, now_timestamp};

const MAX_KEYWORDS: usize = 10;
const MAX_SEARCH_RESULTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub message_id: MessageId,
    pub timestamp: String,
    pub instruction: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexDocument {
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

/// Unique whitespace-separated words of at least two characters, in order of
/// first appearance, at most ten.
pub fn extract_keywords(instruction: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    instruction
        .split_whitespace()
        .filter(|w| w.chars().count() >= 2)
        .filter(|w| seen.insert(*w))
        .take(MAX_KEYWORDS)
        .map(str::to_owned)
        .collect()
}

#[derive(Debug, Clone)]
pub struct TaskIndex {
    doc: AtomicStore<IndexDocument>,
}

impl TaskIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            doc: AtomicStore::new(path),
        }
    }

    /// Insert or replace the record for `message_id`. Records are kept
    /// newest message first.
    #[instrument(skip(self, instruction, summary, files))]
    pub async fn record(
        &self,
        message_id: MessageId,
        instruction: &str,
        summary: &str,
        files: Vec<String>,
    ) -> StoreResult<TaskRecord> {
        if instruction.trim().is_empty() {
            return Err(StoreError::InvalidArgument("instruction is required".into()));
        }
        let record = TaskRecord {
            message_id,
            timestamp: now_timestamp(),
            instruction: instruction.to_owned(),
            keywords: extract_keywords(instruction),
            summary: summary.to_owned(),
            files,
        };
        let stored = record.clone();
        self.doc
            .update(move |doc| {
                match doc.tasks.iter_mut().find(|t| t.message_id == message_id) {
                    Some(existing) => *existing = stored,
                    None => doc.tasks.push(stored),
                }
                doc.tasks.sort_by(|a, b| b.message_id.cmp(&a.message_id));
                Ok(())
            })
            .await?;
        debug!(message_id, keywords = record.keywords.len(), "task indexed");
        Ok(record)
    }

    /// Records ranked by how many query words appear in their instruction or
    /// summary. Records matching nothing are omitted.
    pub async fn search(&self, query: &str) -> Vec<TaskRecord> {
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if words.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(usize, TaskRecord)> = self
            .doc
            .load()
            .await
            .tasks
            .into_iter()
            .filter_map(|task| {
                let content = format!("{} {}", task.instruction, task.summary).to_lowercase();
                let score = words.iter().filter(|w| content.contains(w.as_str())).count();
                (score > 0).then_some((score, task))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(MAX_SEARCH_RESULTS)
            .map(|(_, task)| task)
            .collect()
    }

    /// The `limit` most recent records.
    pub async fn recent(&self, limit: usize) -> Vec<TaskRecord> {
        let mut tasks = self.doc.load().await.tasks;
        tasks.truncate(limit);
        tasks
    }
}
