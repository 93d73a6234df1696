//! Runtime configuration.
//!
//! Reads the `[mailroom]` section from `config/default.toml`, then applies
//! environment overrides. Command-line flags are applied last by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use mailroom_store::StoreOptions;
use mailroom_web::{Channel, ExecutorConfig, RunMode, WebConfig};
use serde::Deserialize;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Settings from the `[mailroom]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MailroomConfig {
    pub root: PathBuf,
    pub bind: String,
    pub port: u16,
    /// Server the viewer connects to.
    pub url: String,
    pub poll_interval_ms: u64,
    pub log_capacity: usize,
    pub stale_after_secs: u64,
    /// 0 disables trimming.
    pub outbox_retention: usize,
    pub executor: ExecutorSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub interpreter: String,
    pub script: PathBuf,
    pub channel: String,
    pub run_mode: String,
}

impl Default for MailroomConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            bind: "127.0.0.1".into(),
            port: 8080,
            url: "http://127.0.0.1:8080".into(),
            poll_interval_ms: 2000,
            log_capacity: 200,
            stale_after_secs: 900,
            outbox_retention: 0,
            executor: ExecutorSection::default(),
        }
    }
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            interpreter: "bash".into(),
            script: PathBuf::from("executor.sh"),
            channel: "webmock".into(),
            run_mode: "webmock".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    mailroom: MailroomConfig,
}

impl MailroomConfig {
    /// Load from `path`. A missing file yields the defaults; a file that
    /// does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        Self::parse(&content).with_context(|| format!("invalid config in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.mailroom)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; unset and empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(root) = get("MAILROOM_ROOT") {
            self.root = PathBuf::from(root);
        }
        if let Some(bind) = get("MAILROOM_BIND") {
            self.bind = bind;
        }
        if let Some(port) = get("MAILROOM_PORT") {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("MAILROOM_PORT is not a port: {port}"))?;
        }
        if let Some(url) = get("MAILROOM_URL") {
            self.url = url;
        }
        if let Some(channel) = get("MESSAGE_CHANNEL") {
            self.executor.channel = channel;
        }
        if let Some(run_mode) = get("RUN_MODE") {
            self.executor.run_mode = run_mode;
        }
        Ok(())
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            log_capacity: self.log_capacity.max(1),
            stale_after: Duration::from_secs(self.stale_after_secs),
            outbox_retention: (self.outbox_retention > 0).then_some(self.outbox_retention),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    /// Build the web server configuration. The executor runs inside the
    /// state root.
    pub fn web_config(&self) -> Result<WebConfig> {
        let channel: Channel = self.executor.channel.parse().map_err(|e: String| anyhow!(e))?;
        let run_mode: RunMode = self.executor.run_mode.parse().map_err(|e: String| anyhow!(e))?;
        Ok(WebConfig {
            bind_addr: self.bind.clone(),
            port: self.port,
            root: self.root.clone(),
            executor: ExecutorConfig {
                interpreter: self.executor.interpreter.clone(),
                script: self.executor.script.clone(),
                workdir: self.root.clone(),
                channel,
                run_mode,
                ..ExecutorConfig::default()
            },
            store: self.store_options(),
        })
    }
}
