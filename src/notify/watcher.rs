//! Local file watching with echo suppression.

use super::notifier::panic_message;
use crate::core::WatcherSettings;
use crate::error::{ConfigError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::SyncMetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

/// Callback invoked with a watched file's path and its new bytes (empty when deleted).
///
/// Implemented for every `Fn(&Path, &[u8]) + Send + Sync`.
pub trait FileListener: Send + Sync {
    /// Called on the watcher thread after the file changed.
    fn file_changed(&self, path: &Path, content: &[u8]);
}

impl<F> FileListener for F
where
    F: Fn(&Path, &[u8]) + Send + Sync,
{
    fn file_changed(&self, path: &Path, content: &[u8]) {
        self(path, content)
    }
}

struct Shared {
    registrations: Mutex<HashMap<PathBuf, Vec<Arc<dyn FileListener>>>>,
    masks: Mutex<HashMap<PathBuf, Instant>>,
    directories: Mutex<HashSet<PathBuf>>,
    mask_window: Duration,
    settle: Duration,
    #[cfg(feature = "metrics")]
    metrics: OnceLock<SyncMetrics>,
}

/// Process-wide watcher multiplexing many (file, listener) subscriptions.
///
/// Each distinct parent directory gets one OS watch. Raw events are coalesced for a
/// short settle delay, so one write produces one delivery per file. Writers that change
/// a watched file themselves call [`mask`](Self::mask) first: the next event for that
/// path within the mask window is swallowed instead of echoed back to them.
///
/// # Examples
///
/// ```rust,no_run
/// use confcenter::notify::LocalFileWatcher;
/// use std::path::Path;
/// use std::sync::Arc;
///
/// # fn example() -> confcenter::error::Result<()> {
/// let watcher = LocalFileWatcher::new(Default::default())?;
/// watcher.watch(
///     "/var/cache/app/app.ini",
///     Arc::new(|path: &Path, bytes: &[u8]| {
///         println!("{} now has {} bytes", path.display(), bytes.len());
///     }),
/// )?;
///
/// // our own write: not reported back
/// watcher.mask("/var/cache/app/app.ini");
/// std::fs::write("/var/cache/app/app.ini", "a=1")?;
/// # Ok(())
/// # }
/// ```
pub struct LocalFileWatcher {
    shared: Arc<Shared>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LocalFileWatcher {
    /// Start the watcher thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher or the thread cannot be created.
    pub fn new(settings: WatcherSettings) -> Result<Self> {
        Self::with_timing(settings.mask_window(), settings.settle())
    }

    /// Start the watcher thread with explicit timing.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher or the thread cannot be created.
    pub fn with_timing(mask_window: Duration, settle: Duration) -> Result<Self> {
        let (tx, rx) = channel();
        let watcher = notify::recommended_watcher(tx)
            .map_err(|e| ConfigError::WatchError(format!("Failed to create file watcher: {}", e)))?;

        let shared = Arc::new(Shared {
            registrations: Mutex::new(HashMap::new()),
            masks: Mutex::new(HashMap::new()),
            directories: Mutex::new(HashSet::new()),
            mask_window,
            settle,
            #[cfg(feature = "metrics")]
            metrics: OnceLock::new(),
        });
        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("local-file-watcher".to_string())
            .spawn(move || worker.run(rx))?;

        Ok(Self {
            shared,
            watcher: Mutex::new(Some(watcher)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Attach metrics. Only the first call takes effect.
    #[cfg(feature = "metrics")]
    pub fn set_metrics(&self, metrics: SyncMetrics) {
        let _ = self.shared.metrics.set(metrics);
    }

    /// Deliver changes of `path` to `listener`.
    ///
    /// The file itself need not exist yet, but its parent directory must. Registering
    /// the same listener twice for a path is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be resolved or watched, or if the
    /// watcher has been shut down.
    pub fn watch(&self, path: impl AsRef<Path>, listener: Arc<dyn FileListener>) -> Result<()> {
        let key = watch_key(path.as_ref())?;
        let dir = key
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::WatchError(format!("No parent for {}", key.display())))?;

        {
            let mut directories = self.shared.directories.lock();
            if !directories.contains(&dir) {
                let mut watcher = self.watcher.lock();
                let watcher = watcher
                    .as_mut()
                    .ok_or_else(|| ConfigError::WatchError("File watcher is shut down".to_string()))?;
                watcher
                    .watch(&dir, RecursiveMode::NonRecursive)
                    .map_err(|e| ConfigError::WatchError(format!("Failed to watch {}: {}", dir.display(), e)))?;
                tracing::info!(dir = %dir.display(), "watching directory");
                directories.insert(dir);
            }
        }

        let mut registrations = self.shared.registrations.lock();
        let listeners = registrations.entry(key.clone()).or_default();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
            tracing::debug!(path = %key.display(), "file listener registered");
        }
        Ok(())
    }

    /// Stop delivering changes of `path` to `listener`. Returns whether it was
    /// registered. The directory watch stays in place.
    pub fn unwatch(&self, path: impl AsRef<Path>, listener: &Arc<dyn FileListener>) -> bool {
        let key = mask_key(path.as_ref());
        let mut registrations = self.shared.registrations.lock();
        let Some(listeners) = registrations.get_mut(&key) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            registrations.remove(&key);
        }
        removed
    }

    /// Announce that the caller is about to change `path` itself.
    pub fn mask(&self, path: impl AsRef<Path>) {
        let key = mask_key(path.as_ref());
        tracing::debug!(path = %key.display(), "masking next change");
        self.shared.masks.lock().insert(key, Instant::now());
    }

    /// Directories currently under an OS watch.
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<_> = self.shared.directories.lock().iter().cloned().collect();
        dirs.sort();
        dirs
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.watcher.lock().is_none()
    }

    /// Stop watching and let the watcher thread exit. Idempotent.
    pub fn shutdown(&self) {
        let Some(watcher) = self.watcher.lock().take() else {
            return;
        };
        // dropping the platform watcher closes the event channel
        drop(watcher);
        self.shared.directories.lock().clear();
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        tracing::info!("file watcher shut down");
    }
}

impl Drop for LocalFileWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LocalFileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileWatcher")
            .field("directories", &self.watched_directories())
            .field("mask_window", &self.shared.mask_window)
            .field("settle", &self.shared.settle)
            .finish()
    }
}

impl Shared {
    fn run(&self, rx: Receiver<notify::Result<Event>>) {
        while let Ok(first) = rx.recv() {
            let mut paths = BTreeSet::new();
            collect(&mut paths, first);
            let deadline = Instant::now() + self.settle;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match rx.recv_timeout(remaining) {
                    Ok(event) => collect(&mut paths, event),
                    Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
                }
            }
            self.process(paths);
        }
        tracing::debug!("file watcher thread exiting");
    }

    fn process(&self, paths: BTreeSet<PathBuf>) {
        for path in paths {
            let listeners = self.registrations.lock().get(&path).cloned();
            let Some(listeners) = listeners else {
                continue;
            };
            if self.take_mask(&path) {
                tracing::debug!(path = %path.display(), "suppressed self-caused change");
                #[cfg(feature = "metrics")]
                if let Some(metrics) = self.metrics.get() {
                    metrics.record_file_suppressed(&path.display().to_string());
                }
                continue;
            }
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read changed file");
                    continue;
                }
            };
            tracing::info!(path = %path.display(), bytes = bytes.len(), "file changed");
            #[cfg(feature = "metrics")]
            if let Some(metrics) = self.metrics.get() {
                metrics.record_file_delivered(&path.display().to_string());
            }
            for listener in &listeners {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.file_changed(&path, &bytes))) {
                    tracing::error!(
                        path = %path.display(),
                        reason = %panic_message(panic.as_ref()),
                        "file listener failed"
                    );
                }
            }
        }
    }

    /// Consume the mask for `path`; true if it was still fresh.
    fn take_mask(&self, path: &Path) -> bool {
        self.masks
            .lock()
            .remove(path)
            .is_some_and(|masked_at| masked_at.elapsed() < self.mask_window)
    }
}

fn collect(paths: &mut BTreeSet<PathBuf>, event: notify::Result<Event>) {
    match event {
        Ok(event) => {
            if matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                paths.extend(event.paths);
            }
        }
        Err(e) => tracing::warn!(error = %e, "file watch error"),
    }
}

/// Canonical parent joined with the file name; the parent must exist.
fn watch_key(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ConfigError::WatchError(format!("Not a file path: {}", path.display())))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let parent = parent.canonicalize().map_err(|e| {
        ConfigError::WatchError(format!("Failed to resolve {}: {}", parent.display(), e))
    })?;
    Ok(parent.join(file_name))
}

fn mask_key(path: &Path) -> PathBuf {
    watch_key(path).unwrap_or_else(|_| path.to_path_buf())
}
