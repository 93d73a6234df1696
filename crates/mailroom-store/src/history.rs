//! Merged conversation timeline with a durable history cache.
//!
//! The live queue and outbox only hold recent and active work; a producer
//! that restarts may rewrite `messages.json` from scratch. [`HistoryMerger`]
//! folds every item it has ever seen into `web_chat_history.json` so the
//! viewer's timeline only grows.
//!
//! Reconciliation on each [`merge`](HistoryMerger::merge):
//!
//! 1. load history, queue and outbox;
//! 2. append live items whose key is not in history;
//! 3. raise `processed` on history entries the queue reports as done (the
//!    flag never goes back, so a merge working from an older queue read
//!    cannot undo a newer one);
//! 4. collapse duplicates, sort, persist if anything changed.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::atomic::AtomicStore;
use crate::error::StoreResult;
use crate::outbox::OutboxStore;
use crate::queue::QueueStore;
use crate::types::{Direction, MessageId, TimelineItem};

/// On-disk shape of `web_chat_history.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default)]
    pub messages: Vec<TimelineItem>,
}

/// Identity of a timeline item across merges.
///
/// Direction and id identify the item; the server-assigned timestamp keeps a
/// queue whose id counter restarted from aliasing onto older history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HistoryKey {
    direction: Direction,
    id: MessageId,
    timestamp: String,
}

impl HistoryKey {
    fn of(item: &TimelineItem) -> Self {
        Self {
            direction: item.direction,
            id: item.id,
            timestamp: item.timestamp.clone(),
        }
    }
}

fn timeline_order(a: &TimelineItem, b: &TimelineItem) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then(a.direction.cmp(&b.direction))
        .then(a.id.cmp(&b.id))
}

/// Builds the merged timeline from the live stores and persisted history.
#[derive(Debug, Clone)]
pub struct HistoryMerger {
    queue: QueueStore,
    outbox: OutboxStore,
    history: AtomicStore<HistoryDocument>,
}

impl HistoryMerger {
    pub fn new(queue: QueueStore, outbox: OutboxStore, history_path: impl Into<PathBuf>) -> Self {
        Self {
            queue,
            outbox,
            history: AtomicStore::new(history_path),
        }
    }

    pub fn document(&self) -> &AtomicStore<HistoryDocument> {
        &self.history
    }

    /// Reconcile and return the display timeline.
    #[instrument(skip(self))]
    pub async fn merge(&self) -> StoreResult<Vec<TimelineItem>> {
        let mut live: Vec<TimelineItem> =
            self.queue.list().await.iter().map(TimelineItem::from).collect();
        live.extend(self.outbox.list().await.iter().map(TimelineItem::from));

        self.history
            .update_if_changed(move |doc| {
                let changed = reconcile(&mut doc.messages, live);
                if changed {
                    debug!(items = doc.messages.len(), "history re-synchronized");
                }
                Ok((doc.messages.clone(), changed))
            })
            .await
    }

    /// Add a single item to history right away (e.g. when it is posted).
    pub async fn record(&self, item: TimelineItem) -> StoreResult<()> {
        self.history
            .update_if_changed(move |doc| {
                let key = HistoryKey::of(&item);
                if doc.messages.iter().any(|m| HistoryKey::of(m) == key) {
                    return Ok(((), false));
                }
                doc.messages.push(item);
                doc.messages.sort_by(timeline_order);
                Ok(((), true))
            })
            .await
    }

    /// Persisted history without reconciling against the live stores.
    pub async fn snapshot(&self) -> Vec<TimelineItem> {
        self.history.load().await.messages
    }
}

/// Fold `live` into `history`. Returns whether `history` changed.
fn reconcile(history: &mut Vec<TimelineItem>, live: Vec<TimelineItem>) -> bool {
    let mut changed = false;

    let mut seen = HashSet::new();
    let before = history.len();
    history.retain(|item| seen.insert(HistoryKey::of(item)));
    changed |= history.len() != before;

    let mut index: HashMap<HistoryKey, usize> = history
        .iter()
        .enumerate()
        .map(|(i, item)| (HistoryKey::of(item), i))
        .collect();

    for item in live {
        let key = HistoryKey::of(&item);
        match index.get(&key) {
            Some(&i) => {
                let existing = &mut history[i];
                let raise = item.direction == Direction::In
                    && item.processed.is_some()
                    && existing.processed != Some(true)
                    && existing.processed != item.processed;
                if raise {
                    existing.processed = item.processed;
                    changed = true;
                }
            }
            None => {
                index.insert(key, history.len());
                history.push(item);
                changed = true;
            }
        }
    }

    let sorted = history
        .windows(2)
        .all(|w| timeline_order(&w[0], &w[1]) != Ordering::Greater);
    if !sorted {
        history.sort_by(timeline_order);
        changed = true;
    }

    changed
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewMessage, Payload};

    struct Fixture {
        _dir: tempfile::TempDir,
        queue: QueueStore,
        outbox: OutboxStore,
        merger: HistoryMerger,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueStore::new(dir.path().join("messages.json"));
        let outbox = OutboxStore::new(dir.path().join("web_outbox.json"));
        let merger = HistoryMerger::new(
            queue.clone(),
            outbox.clone(),
            dir.path().join("web_chat_history.json"),
        );
        Fixture {
            _dir: dir,
            queue,
            outbox,
            merger,
        }
    }

    #[tokio::test]
    async fn merge_interleaves_in_and_out() {
        let f = fixture();
        let msg = f.queue.enqueue(NewMessage::text("ping")).await.unwrap();
        f.outbox.append(Some(msg.id), Payload::text("pong"), None).await.unwrap();

        let timeline = f.merger.merge().await.unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].direction, Direction::In);
        assert_eq!(timeline[1].direction, Direction::Out);
        assert_eq!(timeline[1].reply_to, Some(msg.id));
    }

    #[tokio::test]
    async fn processed_follows_the_queue() {
        let f = fixture();
        let msg = f.queue.enqueue(NewMessage::text("job")).await.unwrap();
        let first = f.merger.merge().await.unwrap();
        assert_eq!(first[0].processed, Some(false));

        f.queue.mark_processed(msg.id).await.unwrap();
        let second = f.merger.merge().await.unwrap();
        assert_eq!(second[0].processed, Some(true));
        assert_eq!(f.merger.snapshot().await[0].processed, Some(true));
    }

    #[tokio::test]
    async fn history_survives_queue_reset() {
        let f = fixture();
        f.queue.enqueue(NewMessage::text("A")).await.unwrap();
        f.outbox.append(None, Payload::text("B"), None).await.unwrap();
        assert_eq!(f.merger.merge().await.unwrap().len(), 2);

        std::fs::write(f.queue.document().path(), r#"{"messages":[],"last_update_id":0}"#).unwrap();
        std::fs::write(f.outbox.document().path(), r#"{"messages":[]}"#).unwrap();

        let timeline = f.merger.merge().await.unwrap();
        let texts: Vec<_> = timeline.iter().map(|i| i.display_text()).collect();
        assert_eq!(texts, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn restarted_ids_do_not_alias_old_history() {
        let f = fixture();
        let old = f.queue.enqueue(NewMessage::text("old")).await.unwrap();
        f.merger.merge().await.unwrap();

        std::fs::remove_file(f.queue.document().path()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let new = f.queue.enqueue(NewMessage::text("new")).await.unwrap();
        assert_eq!(old.id, new.id);

        let timeline = f.merger.merge().await.unwrap();
        let texts: Vec<_> = timeline.iter().map(|i| i.display_text()).collect();
        assert_eq!(texts, vec!["old", "new"]);
    }

    #[tokio::test]
    async fn unchanged_merge_does_not_rewrite_history() {
        let f = fixture();
        f.queue.enqueue(NewMessage::text("x")).await.unwrap();
        f.merger.merge().await.unwrap();
        let path = f.merger.document().path().to_path_buf();
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        f.merger.merge().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn record_is_deduplicated() {
        let f = fixture();
        let msg = f.queue.enqueue(NewMessage::text("once")).await.unwrap();
        let item = TimelineItem::from(&msg);
        f.merger.record(item.clone()).await.unwrap();
        f.merger.record(item).await.unwrap();
        assert_eq!(f.merger.snapshot().await.len(), 1);
        assert_eq!(f.merger.merge().await.unwrap().len(), 1);
    }

    fn inbound(processed: bool) -> TimelineItem {
        TimelineItem {
            id: 4,
            direction: Direction::In,
            kind: crate::types::MessageKind::Text,
            text: Some("job".into()),
            caption: None,
            file_path: None,
            file_url: None,
            chat_id: None,
            user: None,
            reply_to: None,
            timestamp: "2026-01-01T00:00:00.000000Z".into(),
            processed: Some(processed),
        }
    }

    #[test]
    fn older_queue_read_cannot_unmark_processed() {
        let mut history = Vec::new();
        assert!(reconcile(&mut history, vec![inbound(true)]));
        assert!(!reconcile(&mut history, vec![inbound(false)]));
        assert_eq!(history[0].processed, Some(true));
    }

    #[tokio::test]
    async fn stale_merge_after_a_fresh_one_keeps_processed() {
        let f = fixture();
        let msg = f.queue.enqueue(NewMessage::text("job")).await.unwrap();
        let stale = TimelineItem::from(&f.queue.get(msg.id).await.unwrap());

        f.queue.mark_processed(msg.id).await.unwrap();
        assert_eq!(f.merger.merge().await.unwrap()[0].processed, Some(true));

        // A merge that read the queue before it was marked lands last.
        f.merger
            .document()
            .update_if_changed(move |doc| {
                let changed = reconcile(&mut doc.messages, vec![stale]);
                Ok(((), changed))
            })
            .await
            .unwrap();
        assert_eq!(f.merger.snapshot().await[0].processed, Some(true));
    }

    #[test]
    fn reconcile_collapses_duplicates() {
        let item = TimelineItem {
            id: 1,
            direction: Direction::Out,
            kind: crate::types::MessageKind::Text,
            text: Some("dup".into()),
            caption: None,
            file_path: None,
            file_url: None,
            chat_id: None,
            user: None,
            reply_to: None,
            timestamp: "2026-01-01T00:00:00.000000Z".into(),
            processed: None,
        };
        let mut history = vec![item.clone(), item.clone()];
        assert!(reconcile(&mut history, vec![item]));
        assert_eq!(history.len(), 1);
    }
}
