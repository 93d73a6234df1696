//! CLI argument definitions for Mailroom.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

/// Mailroom -- a file-backed work queue with a live viewer.
#[derive(Parser)]
#[command(
    name = "mailroom",
    version,
    about = "Mailroom -- file-backed work queue with a live viewer",
    long_about = "Producers enqueue instructions, an out-of-band executor works through them \
                  and reports to an outbox, and viewers follow progress over HTTP."
)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// State root holding the queue, outbox and worker documents.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and executor supervisor.
    Serve {
        /// Address to bind the HTTP server to.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on.
        #[arg(long, short)]
        port: Option<u16>,

        /// Never spawn the executor; something else schedules it.
        #[arg(long)]
        external: bool,
    },

    /// Start the terminal viewer.
    Tui {
        /// Server URL, e.g. http://127.0.0.1:8080.
        #[arg(long)]
        url: Option<String>,
    },

    /// Add a message to the queue.
    Enqueue {
        /// Message text (the caption for attachments).
        text: Option<String>,

        /// Attach a photo, relative to the state root.
        #[arg(long, conflicts_with = "document")]
        photo: Option<String>,

        /// Attach a document, relative to the state root.
        #[arg(long)]
        document: Option<String>,

        #[arg(long)]
        chat_id: Option<i64>,

        #[arg(long)]
        user: Option<String>,
    },

    /// Inspect and update the inbound queue.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Append to or list the outbox.
    Outbox {
        #[command(subcommand)]
        action: OutboxAction,
    },

    /// Worker liveness record.
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },

    /// Search the index of completed tasks.
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Run the built-in echo executor over pending messages.
    Work {
        /// Handle at most one message.
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand)]
pub enum QueueAction {
    /// Print unprocessed messages, oldest first.
    Pending,
    /// Print every message.
    List,
    /// Mark a message processed and index it.
    Done {
        id: u64,
        /// Outcome summary stored in the task index.
        #[arg(long, default_value = "")]
        summary: String,
        /// Instruction to index instead of the message text.
        #[arg(long)]
        instruction: Option<String>,
        /// Files produced by the task.
        #[arg(long = "file")]
        files: Vec<String>,
    },
}

/// Where an outbox entry goes and what it answers.
#[derive(clap::Args)]
pub struct Target {
    /// Queue message this entry reports on.
    #[arg(long)]
    pub reply_to: Option<u64>,

    #[arg(long)]
    pub chat_id: Option<i64>,
}

#[derive(Subcommand)]
pub enum OutboxAction {
    /// Append a text report.
    Text {
        text: String,
        #[command(flatten)]
        target: Target,
    },
    /// Append a photo report; the path is relative to the state root.
    Photo {
        path: String,
        #[arg(long)]
        caption: Option<String>,
        #[command(flatten)]
        target: Target,
    },
    /// Append a document report; the path is relative to the state root.
    Document {
        path: String,
        #[arg(long)]
        caption: Option<String>,
        #[command(flatten)]
        target: Target,
    },
    /// Print outbox entries.
    List {
        /// Only entries answering this message.
        #[arg(long)]
        reply_to: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum WorkerAction {
    /// Claim the work slot. Exits 3 when busy and 4 when a stale record
    /// holds it.
    Begin {
        message_id: u64,
        /// Process to record. Defaults to the calling process.
        #[arg(long)]
        pid: Option<u32>,
    },
    /// Release the slot held for a message.
    End { message_id: u64 },
    /// Refresh the heartbeat.
    Heartbeat,
    /// Append lines to the log tail; reads stdin when none are given.
    Log { lines: Vec<String> },
    /// Print the record and its phase.
    Status,
}

#[derive(Subcommand)]
pub enum MemoryAction {
    /// Past tasks matching the query.
    Search { query: String },
    /// Most recent tasks.
    Recent {
        #[arg(long, short, default_value_t = 3)]
        limit: usize,
    },
}
