//! # mailroom-store
//!
//! File-resident coordination state for Mailroom.
//!
//! Producers append instructions to a queue, an out-of-band executor reports
//! to an append-only outbox and a liveness record, and viewers read a merged
//! timeline. Every document is a standalone JSON file guarded by its own
//! advisory lock and replaced by atomic rename.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  HistoryMerger   (web_chat_history.json)     │
//! ├───────────────┬───────────────┬──────────────┤
//! │  QueueStore   │  OutboxStore  │ WorkerStatus │
//! │ messages.json │ web_outbox... │ working.json │
//! ├───────────────┴───────────────┴──────────────┤
//! │  AtomicStore  (fs2 lock + temp + rename)     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use mailroom_store::{NewMessage, StateDir, StoreOptions};
//!
//! let stores = StateDir::new("state").open(&StoreOptions::default());
//! let msg = stores.queue.enqueue(NewMessage::text("ping")).await?;
//! let timeline = stores.history.merge().await?;
//! ```

pub mod atomic;
pub mod error;
pub mod history;
pub mod index;
pub mod layout;
pub mod outbox;
pub mod process;
pub mod queue;
pub mod snapshot;
pub mod types;
pub mod worker;

// ── re-exports ───────────────────────────────────────────────────────

pub use atomic::{AtomicStore, DEFAULT_LOCK_TIMEOUT};
pub use error::{StoreError, StoreResult};
pub use history::{HistoryDocument, HistoryMerger};
pub use index::{IndexDocument, TaskIndex, TaskRecord, extract_keywords};
pub use layout::{StateDir, StoreOptions, Stores};
pub use outbox::{OutboxDocument, OutboxStore};
pub use queue::{MarkOutcome, QueueDocument, QueueStore};
pub use snapshot::{StatusSnapshot, TimelineResponse};
pub use types::{
    Direction, Message, MessageId, MessageKind, NewMessage, OutboxEntry, Payload, TimelineItem,
    file_url, now_timestamp,
};
pub use worker::{
    BeginOutcome, ForcedIdle, StaleReason, WorkerPhase, WorkerStatus, WorkerStatusTracker,
    WorkingState,
};
