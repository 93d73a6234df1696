//! Durable JSON documents with write-temp-then-rename under an advisory lock.
//!
//! [`AtomicStore`] is the persistence primitive every other store builds on.
//! Each document lives in its own file with a sibling `<file>.lock` used for
//! an exclusive `flock`-style lock (via `fs2`). Writers hold the lock for the
//! entire read-modify-write cycle; readers never take the lock because the
//! rename makes every observed file a complete document.
//!
//! The synchronous `*_blocking` methods do the actual work. The async
//! methods dispatch them onto `tokio::task::spawn_blocking` so handlers never
//! block the runtime on file I/O or lock contention.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Default time to wait for a document lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a single JSON document on disk.
pub struct AtomicStore<D> {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    _doc: PhantomData<fn() -> D>,
}

impl<D> Clone for AtomicStore<D> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            lock_path: self.lock_path.clone(),
            lock_timeout: self.lock_timeout,
            _doc: PhantomData,
        }
    }
}

impl<D> std::fmt::Debug for AtomicStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicStore")
            .field("path", &self.path)
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

/// Result of reading the backing file without any fallback applied.
enum ReadOutcome<D> {
    Missing,
    Parsed(D),
    /// The bytes were read but do not decode.
    Corrupt(String),
    /// The file exists but could not be read.
    Unreadable(std::io::Error),
}

impl<D> AtomicStore<D>
where
    D: Serialize + DeserializeOwned + Default + Send + 'static,
{
    /// Create a handle for the document at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.clone().into_os_string();
        lock_name.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_name),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            _doc: PhantomData,
        }
    }

    /// Override how long writers wait for the lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the sibling lock file.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    // ── blocking API ─────────────────────────────────────────────────

    /// Load the document, falling back to `D::default()` when the file is
    /// missing or unparseable. Never fails.
    pub fn load_blocking(&self) -> D {
        match self.read() {
            ReadOutcome::Parsed(doc) => doc,
            ReadOutcome::Missing => D::default(),
            ReadOutcome::Corrupt(message) => {
                warn!(
                    path = %self.path.display(),
                    error = %message,
                    "corrupt document, serving default"
                );
                D::default()
            }
            ReadOutcome::Unreadable(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "unreadable document, serving default"
                );
                D::default()
            }
        }
    }

    /// Replace the document wholesale.
    ///
    /// This is the explicit repair path: it overwrites a corrupt file.
    pub fn save_blocking(&self, doc: &D) -> StoreResult<()> {
        let _guard = self.lock()?;
        self.write(doc)
    }

    /// Run a read-modify-write cycle with the lock held throughout.
    ///
    /// The closure's changes are persisted only if it returns `Ok`. A corrupt
    /// document is moved aside to `<file>.corrupt-<millis>` before the
    /// closure sees a fresh default.
    pub fn update_blocking<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut D) -> StoreResult<T>,
    {
        self.update_if_changed_blocking(|doc| f(doc).map(|out| (out, true)))
    }

    /// Like [`update_blocking`](Self::update_blocking), but the closure
    /// reports whether it changed anything and the write is skipped if not.
    pub fn update_if_changed_blocking<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut D) -> StoreResult<(T, bool)>,
    {
        let _guard = self.lock()?;
        let mut doc = match self.read() {
            ReadOutcome::Parsed(doc) => doc,
            ReadOutcome::Missing => D::default(),
            ReadOutcome::Corrupt(message) => {
                let moved = self.quarantine()?;
                warn!(
                    path = %self.path.display(),
                    quarantined = %moved.display(),
                    error = %message,
                    "corrupt document moved aside before update"
                );
                D::default()
            }
            ReadOutcome::Unreadable(e) => return Err(StoreError::Io(e)),
        };
        let (out, changed) = f(&mut doc)?;
        if changed {
            self.write(&doc)?;
        }
        Ok(out)
    }

    // ── async API ────────────────────────────────────────────────────

    /// Async form of [`load_blocking`](Self::load_blocking).
    pub async fn load(&self) -> D {
        let store = self.clone();
        match tokio::task::spawn_blocking(move || store.load_blocking()).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "load task failed, serving default");
                D::default()
            }
        }
    }

    /// Async form of [`save_blocking`](Self::save_blocking).
    pub async fn save(&self, doc: D) -> StoreResult<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save_blocking(&doc)).await?
    }

    /// Async form of [`update_blocking`](Self::update_blocking).
    pub async fn update<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut D) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update_blocking(f)).await?
    }

    /// Async form of [`update_if_changed_blocking`](Self::update_if_changed_blocking).
    pub async fn update_if_changed<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut D) -> StoreResult<(T, bool)> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update_if_changed_blocking(f)).await?
    }

    // ── internals ────────────────────────────────────────────────────

    fn read(&self) -> ReadOutcome<D> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return ReadOutcome::Missing,
            Err(e) => return ReadOutcome::Unreadable(e),
        };
        match serde_json::from_slice(&bytes) {
            Ok(doc) => ReadOutcome::Parsed(doc),
            Err(e) => ReadOutcome::Corrupt(e.to_string()),
        }
    }

    fn write(&self, doc: &D) -> StoreResult<()> {
        let mut bytes = serde_json::to_vec_pretty(doc).map_err(|e| StoreError::CorruptState {
            path: self.path.clone(),
            message: format!("serialization failed: {e}"),
        })?;
        bytes.push(b'\n');

        let dir = parent_dir(&self.path);
        fs::create_dir_all(dir)?;

        // The temp file is deleted on drop if anything below fails.
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "document saved");
        Ok(())
    }

    fn quarantine(&self) -> StoreResult<PathBuf> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".corrupt-{millis}"));
        let target = PathBuf::from(name);
        fs::rename(&self.path, &target)?;
        Ok(target)
    }

    fn lock(&self) -> StoreResult<LockGuard> {
        LockGuard::acquire(&self.lock_path, self.lock_timeout)
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

// ── lock guard ───────────────────────────────────────────────────────

/// Exclusive advisory lock, released when dropped.
struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    fn acquire(path: &Path, timeout: Duration) -> StoreResult<Self> {
        fs::create_dir_all(parent_dir(path))?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let contended = fs2::lock_contended_error().raw_os_error();
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.raw_os_error() == contended => {}
                Err(e) => return Err(e.into()),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(StoreError::ResourceBusy {
                    path: path.to_path_buf(),
                    waited_ms: elapsed.as_millis() as u64,
                });
            }

            // 5ms, 10ms, 20ms ... capped at 160ms, never past the deadline.
            let backoff = Duration::from_millis(5 << attempt.min(5));
            std::thread::sleep(backoff.min(timeout - elapsed));
            attempt += 1;
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release document lock");
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
