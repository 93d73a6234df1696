//! Executor-facing store commands.
//!
//! Every command prints JSON on stdout so shell executors can consume the
//! result with `jq`.

use anyhow::{Context, Result, bail};
use mailroom_store::{BeginOutcome, MarkOutcome, NewMessage, Payload, StatusSnapshot, Stores};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::{MemoryAction, OutboxAction, QueueAction, Target, WorkerAction};

/// Exit code of `worker begin` when a live worker holds the slot.
pub const EXIT_BUSY: u8 = 3;
/// Exit code of `worker begin` when a stale record holds the slot.
pub const EXIT_STALE: u8 = 4;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Confirm an attachment path names a file under the state root.
fn checked_path(stores: &Stores, path: &str) -> Result<String> {
    stores
        .layout
        .resolve_artifact(path)
        .with_context(|| format!("attachment {path} is not usable"))?;
    Ok(path.to_owned())
}

// ---------------------------------------------------------------------------
// enqueue
// ---------------------------------------------------------------------------

pub struct EnqueueArgs {
    pub text: Option<String>,
    pub photo: Option<String>,
    pub document: Option<String>,
    pub chat_id: Option<i64>,
    pub user: Option<String>,
}

pub async fn enqueue(stores: &Stores, args: EnqueueArgs) -> Result<()> {
    let payload = match (args.photo, args.document) {
        (Some(path), _) => Payload::Photo {
            path: checked_path(stores, &path)?,
            caption: args.text,
        },
        (None, Some(path)) => Payload::Document {
            path: checked_path(stores, &path)?,
            caption: args.text,
        },
        (None, None) => match args.text {
            Some(text) => Payload::text(text),
            None => bail!("nothing to enqueue: give a text, --photo or --document"),
        },
    };
    let message = stores
        .queue
        .enqueue(NewMessage {
            payload,
            chat_id: args.chat_id,
            user: args.user,
        })
        .await?;
    print_json(&message)
}

// ---------------------------------------------------------------------------
// queue
// ---------------------------------------------------------------------------

pub async fn queue(stores: &Stores, action: QueueAction) -> Result<()> {
    match action {
        QueueAction::Pending => print_json(&stores.queue.list_unprocessed().await),
        QueueAction::List => print_json(&stores.queue.list().await),
        QueueAction::Done {
            id,
            summary,
            instruction,
            files,
        } => {
            let outcome = stores.queue.mark_processed(id).await?;
            let instruction = match instruction {
                Some(text) => text,
                None => stores
                    .queue
                    .get(id)
                    .await
                    .and_then(|m| m.text.or(m.caption).or(m.file_path))
                    .unwrap_or_default(),
            };
            let indexed = if instruction.trim().is_empty() {
                false
            } else {
                stores.index.record(id, &instruction, &summary, files).await?;
                true
            };
            print_json(&json!({
                "id": id,
                "outcome": match outcome {
                    MarkOutcome::Marked => "marked",
                    MarkOutcome::AlreadyProcessed => "already_processed",
                },
                "indexed": indexed,
            }))
        }
    }
}

// ---------------------------------------------------------------------------
// outbox
// ---------------------------------------------------------------------------

pub async fn outbox(stores: &Stores, action: OutboxAction) -> Result<()> {
    let (payload, target) = match action {
        OutboxAction::List { reply_to } => {
            let entries = match reply_to {
                Some(id) => stores.outbox.list_for(id).await,
                None => stores.outbox.list().await,
            };
            return print_json(&entries);
        }
        OutboxAction::Text { text, target } => (Payload::text(text), target),
        OutboxAction::Photo {
            path,
            caption,
            target,
        } => (
            Payload::Photo {
                path: checked_path(stores, &path)?,
                caption,
            },
            target,
        ),
        OutboxAction::Document {
            path,
            caption,
            target,
        } => (
            Payload::Document {
                path: checked_path(stores, &path)?,
                caption,
            },
            target,
        ),
    };
    let Target { reply_to, chat_id } = target;
    let entry = stores.outbox.append(reply_to, payload, chat_id).await?;
    print_json(&entry)
}

// ---------------------------------------------------------------------------
// worker
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn calling_pid() -> u32 {
    std::os::unix::process::parent_id()
}

#[cfg(not(unix))]
fn calling_pid() -> u32 {
    std::process::id()
}

/// Returns the process exit code.
pub async fn worker(stores: &Stores, action: WorkerAction) -> Result<u8> {
    match action {
        WorkerAction::Begin { message_id, pid } => {
            let pid = pid.unwrap_or_else(calling_pid);
            let (body, code) = match stores.worker.try_begin(message_id, pid).await? {
                BeginOutcome::Started => (
                    json!({ "outcome": "started", "message_id": message_id, "pid": pid }),
                    0,
                ),
                BeginOutcome::Busy { message_id, pid } => (
                    json!({ "outcome": "busy", "message_id": message_id, "pid": pid }),
                    EXIT_BUSY,
                ),
                BeginOutcome::Stale { message_id, reason } => (
                    json!({ "outcome": "stale", "message_id": message_id, "stale": reason }),
                    EXIT_STALE,
                ),
            };
            print_json(&body)?;
            return Ok(code);
        }
        WorkerAction::End { message_id } => {
            let released = stores.worker.finish(message_id).await?;
            print_json(&json!({ "released": released }))?;
        }
        WorkerAction::Heartbeat => {
            let active = stores.worker.heartbeat().await?;
            print_json(&json!({ "active": active }))?;
        }
        WorkerAction::Log { lines } => {
            let lines = if lines.is_empty() {
                read_stdin_lines().await?
            } else {
                lines
            };
            let appended = lines.len();
            stores.worker.append_log(lines).await?;
            print_json(&json!({ "appended": appended }))?;
        }
        WorkerAction::Status => {
            print_json(&StatusSnapshot::collect(stores, false, None).await)?;
        }
    }
    Ok(0)
}

async fn read_stdin_lines() -> Result<Vec<String>> {
    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    let mut lines = Vec::new();
    while let Some(line) = reader.next_line().await.context("failed to read stdin")? {
        lines.push(line);
    }
    Ok(lines)
}

// ---------------------------------------------------------------------------
// memory
// ---------------------------------------------------------------------------

pub async fn memory(stores: &Stores, action: MemoryAction) -> Result<()> {
    match action {
        MemoryAction::Search { query } => print_json(&stores.index.search(&query).await),
        MemoryAction::Recent { limit } => print_json(&stores.index.recent(limit).await),
    }
}

#[cfg(test)]
mod tests {
    use mailroom_store::{StateDir, StoreOptions};

    use super::*;

    fn open(dir: &tempfile::TempDir) -> Stores {
        StateDir::new(dir.path()).open(&StoreOptions::default())
    }

    fn args(text: Option<&str>) -> EnqueueArgs {
        EnqueueArgs {
            text: text.map(str::to_owned),
            photo: None,
            document: None,
            chat_id: None,
            user: None,
        }
    }

    #[tokio::test]
    async fn enqueue_requires_content() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open(&dir);
        assert!(enqueue(&stores, args(None)).await.is_err());
        assert!(enqueue(&stores, args(Some("  "))).await.is_err());
        enqueue(&stores, args(Some("build it"))).await.unwrap();
        assert_eq!(stores.queue.pending_ids().await, vec![1]);
    }

    #[tokio::test]
    async fn attachments_must_exist_under_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open(&dir);
        let missing = EnqueueArgs {
            photo: Some("shots/missing.png".into()),
            ..args(None)
        };
        assert!(enqueue(&stores, missing).await.is_err());

        std::fs::create_dir_all(dir.path().join("shots")).unwrap();
        std::fs::write(dir.path().join("shots/cat.png"), b"png").unwrap();
        let present = EnqueueArgs {
            photo: Some("shots/cat.png".into()),
            ..args(Some("look"))
        };
        enqueue(&stores, present).await.unwrap();
        let stored = stores.queue.get(1).await.unwrap();
        assert_eq!(stored.file_path.as_deref(), Some("shots/cat.png"));
        assert_eq!(stored.caption.as_deref(), Some("look"));

        let escaping = Target {
            reply_to: None,
            chat_id: None,
        };
        let action = OutboxAction::Document {
            path: "../etc/passwd".into(),
            caption: None,
            target: escaping,
        };
        assert!(outbox(&stores, action).await.is_err());
        assert!(stores.outbox.list().await.is_empty());
    }

    #[tokio::test]
    async fn done_indexes_the_message_text() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open(&dir);
        enqueue(&stores, args(Some("landing page for a cafe"))).await.unwrap();

        let action = QueueAction::Done {
            id: 1,
            summary: "page built".into(),
            instruction: None,
            files: vec!["out/index.html".into()],
        };
        queue(&stores, action).await.unwrap();

        assert!(stores.queue.pending_ids().await.is_empty());
        let found = stores.index.search("cafe").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].files, ["out/index.html"]);
    }

    #[tokio::test]
    async fn done_on_unknown_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open(&dir);
        let action = QueueAction::Done {
            id: 42,
            summary: String::new(),
            instruction: None,
            files: Vec::new(),
        };
        assert!(queue(&stores, action).await.is_err());
    }

    #[tokio::test]
    async fn begin_reports_busy_with_its_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open(&dir);
        let pid = std::process::id();
        let first = worker(&stores, WorkerAction::Begin { message_id: 1, pid: Some(pid) })
            .await
            .unwrap();
        assert_eq!(first, 0);
        let second = worker(&stores, WorkerAction::Begin { message_id: 2, pid: Some(pid) })
            .await
            .unwrap();
        assert_eq!(second, EXIT_BUSY);

        worker(&stores, WorkerAction::End { message_id: 1 }).await.unwrap();
        assert!(!stores.worker.status().await.state.active);
    }
}
