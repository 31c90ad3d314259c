//! Remote synchronization with a local cache file.

use super::{ContentSource, ContentTarget, RemoteSyncEngine};
use crate::core::{Content, Scheduler};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

#[cfg(feature = "file-watch")]
use crate::notify::{FileListener, LocalFileWatcher};

#[cfg(feature = "metrics")]
use crate::metrics::SyncMetrics;

/// Document source that serves a cache file first and keeps it in sync with the store.
///
/// When the cache file exists its bytes are served immediately and the first remote
/// check is deferred by the sync delay, so a process can start while the store is slow
/// or unreachable. Without a cache file the remote engine starts at once.
///
/// Until the first non-empty result has been accepted, an empty remote result is
/// discarded: a store that is still missing data must not wipe a good cache. After that,
/// every change is written through to the cache file (masked against the file watcher)
/// and offered to the document. Edits made to the cache file by hand are picked up too.
pub struct LocalCacheOverlay {
    engine: Arc<RemoteSyncEngine>,
    cache_path: PathBuf,
    scheduler: Arc<Scheduler>,
    sync_delay: Duration,
    sync_jitter: Duration,
    cache_loaded: AtomicBool,
    synced: AtomicBool,
    target: OnceLock<ContentTarget>,
    #[cfg(feature = "file-watch")]
    watcher: Option<Arc<LocalFileWatcher>>,
    #[cfg(feature = "metrics")]
    metrics: OnceLock<SyncMetrics>,
}

impl LocalCacheOverlay {
    /// Wrap `engine`, caching its content at `cache_path` and deferring work onto
    /// `scheduler`. The sync delay defaults to 20 seconds without jitter.
    pub fn new(
        engine: Arc<RemoteSyncEngine>,
        cache_path: impl Into<PathBuf>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            engine,
            cache_path: cache_path.into(),
            scheduler,
            sync_delay: Duration::from_secs(20),
            sync_jitter: Duration::ZERO,
            cache_loaded: AtomicBool::new(false),
            synced: AtomicBool::new(false),
            target: OnceLock::new(),
            #[cfg(feature = "file-watch")]
            watcher: None,
            #[cfg(feature = "metrics")]
            metrics: OnceLock::new(),
        }
    }

    /// Set the delay before the first remote check and the upper bound of a random
    /// extra delay.
    pub fn with_sync_delay(mut self, delay: Duration, jitter: Duration) -> Self {
        self.sync_delay = delay;
        self.sync_jitter = jitter;
        self
    }

    /// Follow hand edits of the cache file through `watcher` and mask own writes on it.
    #[cfg(feature = "file-watch")]
    pub fn with_watcher(mut self, watcher: Arc<LocalFileWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Attach metrics. Only the first call takes effect.
    #[cfg(feature = "metrics")]
    pub fn set_metrics(&self, metrics: SyncMetrics) {
        let _ = self.metrics.set(metrics);
    }

    /// The cache file.
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &Arc<RemoteSyncEngine> {
        &self.engine
    }

    /// Whether a non-empty remote result has been accepted yet.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    fn first_sync_delay(&self) -> Duration {
        let jitter_ms = self.sync_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            self.sync_delay
        } else {
            self.sync_delay + Duration::from_millis(fastrand::u64(0..=jitter_ms))
        }
    }

    fn on_resolved(&self, bytes: Vec<u8>) {
        let Some(target) = self.target.get() else {
            return;
        };
        let name = self.engine.name();
        if bytes.is_empty() && !self.has_synced() {
            tracing::warn!(
                name = %name,
                cache = %self.cache_path.display(),
                "remote content empty before first sync, keeping cached content"
            );
            #[cfg(feature = "metrics")]
            if let Some(metrics) = self.metrics.get() {
                metrics.record_guard_discard(name);
            }
            return;
        }
        self.synced.store(true, Ordering::SeqCst);

        let Some(current) = target.current() else {
            return;
        };
        let changed = current.bytes() != bytes.as_slice();
        if changed || !self.cache_path.exists() {
            self.write_cache(&bytes);
        }
        if target.offer(bytes) {
            #[cfg(feature = "metrics")]
            if let Some(metrics) = self.metrics.get() {
                metrics.record_change(name);
            }
        }
    }

    fn write_cache(&self, bytes: &[u8]) {
        if let Some(parent) = self.cache_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::error!(dir = %parent.display(), error = %e, "failed to create cache directory");
                return;
            }
        }
        #[cfg(feature = "file-watch")]
        if let Some(watcher) = &self.watcher {
            watcher.mask(&self.cache_path);
        }
        match fs::write(&self.cache_path, bytes) {
            Ok(()) => {
                tracing::info!(
                    name = %self.engine.name(),
                    cache = %self.cache_path.display(),
                    bytes = bytes.len(),
                    "cache file written"
                );
                #[cfg(feature = "metrics")]
                if let Some(metrics) = self.metrics.get() {
                    metrics.record_cache_write(self.engine.name());
                }
            }
            Err(e) => tracing::error!(
                cache = %self.cache_path.display(),
                error = %e,
                "failed to write cache file"
            ),
        }
    }

    #[cfg(feature = "file-watch")]
    fn watch_cache(self: &Arc<Self>) {
        let Some(watcher) = &self.watcher else {
            return;
        };
        if let Some(parent) = self.cache_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!(dir = %parent.display(), error = %e, "cache file will not be watched");
                return;
            }
        }
        let overlay = Arc::downgrade(self);
        let listener: Arc<dyn FileListener> = Arc::new(move |_: &Path, bytes: &[u8]| {
            if let Some(overlay) = overlay.upgrade() {
                overlay.on_cache_edited(bytes);
            }
        });
        if let Err(e) = watcher.watch(&self.cache_path, listener) {
            tracing::warn!(cache = %self.cache_path.display(), error = %e, "cache file will not be watched");
        }
    }

    #[cfg(feature = "file-watch")]
    fn on_cache_edited(&self, bytes: &[u8]) {
        let Some(target) = self.target.get() else {
            return;
        };
        if bytes.is_empty() && !self.has_synced() {
            tracing::warn!(
                cache = %self.cache_path.display(),
                "cache file emptied before first sync, keeping current content"
            );
            return;
        }
        if target.offer(bytes.to_vec()) {
            tracing::info!(cache = %self.cache_path.display(), "cache file edited externally");
        }
    }
}

impl ContentSource for LocalCacheOverlay {
    fn name(&self) -> String {
        format!("cached:{}", self.engine.base_path())
    }

    fn resolve_initial(&self) -> Content {
        match fs::read(&self.cache_path) {
            Ok(bytes) => {
                tracing::info!(
                    cache = %self.cache_path.display(),
                    bytes = bytes.len(),
                    "serving cached content"
                );
                self.cache_loaded.store(true, Ordering::SeqCst);
                Content::from_bytes(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Content::empty(),
            Err(e) => {
                tracing::error!(cache = %self.cache_path.display(), error = %e, "cache file unreadable");
                Content::empty()
            }
        }
    }

    fn start(self: Arc<Self>, target: ContentTarget) {
        let _ = self.target.set(target);
        let overlay: Weak<Self> = Arc::downgrade(&self);
        self.engine.set_handler(Arc::new(move |bytes: Vec<u8>| {
            if let Some(overlay) = overlay.upgrade() {
                overlay.on_resolved(bytes);
            }
        }));

        #[cfg(feature = "file-watch")]
        self.watch_cache();

        if self.cache_loaded.load(Ordering::SeqCst) {
            let delay = self.first_sync_delay();
            tracing::info!(
                name = %self.engine.name(),
                delay_ms = delay.as_millis() as u64,
                "deferring first remote sync"
            );
            let engine = Arc::clone(&self.engine);
            self.scheduler.schedule(delay, move || engine.start());
        } else {
            self.engine.start();
        }
    }
}
