//! CLI entry point for Mailroom.
//!
//! This binary provides the `mailroom` command: the HTTP server, the
//! terminal viewer, and the store commands executors call while working.

mod cli;
mod commands;
mod config;
mod worker;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use mailroom_store::{StateDir, Stores};
use mailroom_tui::TuiConfig;
use mailroom_web::{RunMode, WebServer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::EnqueueArgs;
use crate::config::MailroomConfig;
use crate::worker::CycleOutcome;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // The viewer owns the terminal, so it only logs when asked to.
    let default_level = match cli.command {
        Commands::Tui { .. } => "off",
        Commands::Serve { .. } | Commands::Work { .. } => "info",
        _ => "warn",
    };
    init_tracing(default_level);

    let mut config = MailroomConfig::load(&cli.config)?;
    config.apply_env()?;
    if let Some(root) = cli.root {
        config.root = root;
    }

    let code = match cli.command {
        Commands::Serve {
            bind,
            port,
            external,
        } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            cmd_serve(&config, external).await?;
            0
        }
        Commands::Tui { url } => {
            if let Some(url) = url {
                config.url = url;
            }
            cmd_tui(&config).await?;
            0
        }
        Commands::Enqueue {
            text,
            photo,
            document,
            chat_id,
            user,
        } => {
            let args = EnqueueArgs {
                text,
                photo,
                document,
                chat_id,
                user,
            };
            commands::enqueue(&open_stores(&config)?, args).await?;
            0
        }
        Commands::Queue { action } => {
            commands::queue(&open_stores(&config)?, action).await?;
            0
        }
        Commands::Outbox { action } => {
            commands::outbox(&open_stores(&config)?, action).await?;
            0
        }
        Commands::Worker { action } => commands::worker(&open_stores(&config)?, action).await?,
        Commands::Memory { action } => {
            commands::memory(&open_stores(&config)?, action).await?;
            0
        }
        Commands::Work { once } => cmd_work(&open_stores(&config)?, once).await?,
    };

    Ok(ExitCode::from(code))
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(config: &MailroomConfig, external: bool) -> Result<()> {
    std::fs::create_dir_all(&config.root)
        .with_context(|| format!("failed to create state root {}", config.root.display()))?;

    let mut web = config.web_config()?;
    if external {
        web.executor.run_mode = RunMode::External;
    }
    let server = WebServer::new(web);
    info!(addr = %server.addr(), "serving");
    server.start().await.context("web server failed")
}

// ---------------------------------------------------------------------------
// Subcommand: tui
// ---------------------------------------------------------------------------

async fn cmd_tui(config: &MailroomConfig) -> Result<()> {
    let tui = TuiConfig {
        server_url: config.url.clone(),
        poll_interval: config.poll_interval(),
        ..TuiConfig::default()
    };
    mailroom_tui::run_tui(tui).await.context("viewer failed")
}

// ---------------------------------------------------------------------------
// Subcommand: work
// ---------------------------------------------------------------------------

async fn cmd_work(stores: &Stores, once: bool) -> Result<u8> {
    let pid = std::process::id();
    let mut handled = 0usize;
    loop {
        match worker::run_cycle(stores, pid).await? {
            CycleOutcome::Handled { message_id, route } => {
                handled += 1;
                info!(message_id, route = route.as_str(), "handled");
                if once {
                    break;
                }
            }
            CycleOutcome::Skipped { message_id } => {
                info!(message_id, "skipped message handled elsewhere");
            }
            CycleOutcome::Idle => break,
            CycleOutcome::Busy { message_id } => {
                warn!(?message_id, "another worker is running");
                commands::print_json(&serde_json::json!({ "handled": handled, "busy": true }))?;
                return Ok(commands::EXIT_BUSY);
            }
            CycleOutcome::Stale { reason } => {
                warn!(%reason, "stale worker record; stop it before working");
                commands::print_json(&serde_json::json!({ "handled": handled, "stale": reason }))?;
                return Ok(commands::EXIT_STALE);
            }
        }
    }
    commands::print_json(&serde_json::json!({ "handled": handled }))?;
    Ok(0)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open_stores(config: &MailroomConfig) -> Result<Stores> {
    std::fs::create_dir_all(&config.root)
        .with_context(|| format!("failed to create state root {}", config.root.display()))?;
    Ok(StateDir::new(&config.root).open(&config.store_options()))
}

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
