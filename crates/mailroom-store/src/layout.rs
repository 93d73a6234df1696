//! Where the coordination documents live under a state root.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::history::HistoryMerger;
use crate::index::TaskIndex;
use crate::outbox::OutboxStore;
use crate::queue::QueueStore;
use crate::worker::{DEFAULT_LOG_CAPACITY, DEFAULT_STALE_AFTER, WorkerStatusTracker};

pub const MESSAGES_FILE: &str = "messages.json";
pub const OUTBOX_FILE: &str = "web_outbox.json";
pub const WORKING_FILE: &str = "working.json";
pub const HISTORY_FILE: &str = "web_chat_history.json";
pub const INDEX_FILE: &str = "index.json";

/// Tunables applied when opening the stores.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub log_capacity: usize,
    pub stale_after: Duration,
    pub outbox_retention: Option<usize>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            stale_after: DEFAULT_STALE_AFTER,
            outbox_retention: None,
        }
    }
}

/// Every store handle for one state root.
#[derive(Debug, Clone)]
pub struct Stores {
    pub layout: StateDir,
    pub queue: QueueStore,
    pub outbox: OutboxStore,
    pub history: HistoryMerger,
    pub worker: WorkerStatusTracker,
    pub index: TaskIndex,
}

/// A state root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn messages_path(&self) -> PathBuf {
        self.root.join(MESSAGES_FILE)
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.root.join(OUTBOX_FILE)
    }

    pub fn working_path(&self) -> PathBuf {
        self.root.join(WORKING_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Open handles to every document. Nothing is created on disk until the
    /// first write.
    pub fn open(&self, options: &StoreOptions) -> Stores {
        let queue = QueueStore::new(self.messages_path());
        let mut outbox = OutboxStore::new(self.outbox_path());
        if let Some(max) = options.outbox_retention {
            outbox = outbox.with_retention(max);
        }
        let history = HistoryMerger::new(queue.clone(), outbox.clone(), self.history_path());
        let worker = WorkerStatusTracker::new(self.working_path())
            .with_log_capacity(options.log_capacity)
            .with_stale_after(options.stale_after);
        Stores {
            layout: self.clone(),
            queue,
            outbox,
            history,
            worker,
            index: TaskIndex::new(self.index_path()),
        }
    }

    /// Resolve an artifact path relative to the root.
    ///
    /// Paths that escape the root (via `..`, an absolute path or a symlink)
    /// are `Forbidden`; paths that do not name an existing file are
    /// `NotFound`.
    pub fn resolve_artifact(&self, raw: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(raw);
        let mut depth: usize = 0;
        for component in relative.components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                Component::ParentDir => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| StoreError::Forbidden(raw.to_owned()))?;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(StoreError::Forbidden(raw.to_owned()));
                }
            }
        }

        let missing = || StoreError::NotFound {
            entity: "file",
            id: raw.to_owned(),
        };
        let root = self.root.canonicalize().map_err(|_| missing())?;
        let candidate = root.join(relative).canonicalize().map_err(|_| missing())?;
        if !candidate.starts_with(&root) {
            return Err(StoreError::Forbidden(raw.to_owned()));
        }
        if !candidate.is_file() {
            return Err(missing());
        }
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_files_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("out/a.txt"), b"hi").unwrap();
        let layout = StateDir::new(dir.path());

        let resolved = layout.resolve_artifact("out/a.txt").unwrap();
        assert!(resolved.ends_with("out/a.txt"));
        assert!(layout.resolve_artifact("out/../out/a.txt").is_ok());
    }

    #[test]
    fn escaping_paths_are_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateDir::new(dir.path());
        assert!(matches!(
            layout.resolve_artifact("../etc/passwd"),
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            layout.resolve_artifact("/etc/passwd"),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn missing_and_directories_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let layout = StateDir::new(dir.path());
        assert!(matches!(
            layout.resolve_artifact("nope.png"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            layout.resolve_artifact("sub"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_forbidden() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("link")).unwrap();

        let layout = StateDir::new(dir.path());
        assert!(matches!(
            layout.resolve_artifact("link"),
            Err(StoreError::Forbidden(_))
        ));
    }
}
