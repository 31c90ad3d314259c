//! Builder for constructing ConfigRegistry instances.

use crate::core::registry::RegistryParts;
use crate::core::{ConfigRegistry, DeploymentMode, ProcessIdentity, Scheduler, Settings};
use crate::error::{ConfigError, Result};
use crate::store::CoordinationStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "file-watch")]
use crate::notify::LocalFileWatcher;

#[cfg(feature = "metrics")]
use crate::metrics::SyncMetrics;

/// Builder for constructing a `ConfigRegistry` instance.
///
/// Collaborators that are not injected are created on demand: a [`Scheduler`] for the
/// cached-remote mode and, with the `file-watch` feature, a [`LocalFileWatcher`] for the
/// local and cached-remote modes.
///
/// # Examples
///
/// ```rust,no_run
/// use confcenter::prelude::*;
/// use confcenter::store::MemoryStore;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> Result<()> {
/// let registry = ConfigRegistry::builder()
///     .with_settings(Settings::load(None)?)
///     .with_store(Arc::new(MemoryStore::new()))
///     .with_cache_dir("/var/cache/orders")
///     .with_sync_delay(Duration::from_secs(5), Duration::from_secs(2))
///     .build()?;
/// assert_eq!(registry.mode(), DeploymentMode::CachedRemote);
/// # Ok(())
/// # }
/// ```
pub struct RegistryBuilder {
    settings: Settings,
    identity: Option<ProcessIdentity>,
    store: Option<Arc<dyn CoordinationStore>>,
    scheduler: Option<Arc<Scheduler>>,
    mode: Option<DeploymentMode>,
    #[cfg(feature = "file-watch")]
    watcher: Option<Arc<LocalFileWatcher>>,
    #[cfg(feature = "metrics")]
    metrics: Option<SyncMetrics>,
}

impl RegistryBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            identity: None,
            store: None,
            scheduler: None,
            mode: None,
            #[cfg(feature = "file-watch")]
            watcher: None,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Use `settings` (base path, identity, cache and watcher timing).
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the process identity from the settings.
    pub fn with_identity(mut self, identity: ProcessIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Synchronize documents from `store`.
    pub fn with_store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the base path under which documents live in the store.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.settings.store.base_path = base_path.into();
        self
    }

    /// Keep cache files (or, without a store, read local documents) in `dir`.
    pub fn with_cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.settings.cache.dir = Some(PathBuf::from(dir.as_ref()));
        self
    }

    /// Set the delay before the first remote check of a cached document and the upper
    /// bound of its random extra delay.
    pub fn with_sync_delay(mut self, delay: Duration, jitter: Duration) -> Self {
        self.settings.cache.sync_delay_ms = delay.as_millis() as u64;
        self.settings.cache.sync_jitter_ms = jitter.as_millis() as u64;
        self
    }

    /// Run deferred work on `scheduler` instead of a registry-owned one.
    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Share `watcher` instead of starting a registry-owned one.
    #[cfg(feature = "file-watch")]
    pub fn with_file_watcher(mut self, watcher: Arc<LocalFileWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Force a deployment mode instead of deriving it from what was injected.
    pub fn with_mode(mut self, mode: DeploymentMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Record synchronization metrics with `meter`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, meter: opentelemetry::metrics::Meter) -> Self {
        self.metrics = Some(SyncMetrics::new(meter));
        self
    }

    /// Build the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A remote mode is forced without a store
    /// - The cached-remote mode is forced without a cache directory
    /// - The scheduler or the file watcher cannot be started
    pub fn build(self) -> Result<ConfigRegistry> {
        let derived = match (&self.store, &self.settings.cache.dir) {
            (None, _) => DeploymentMode::Local,
            (Some(_), None) => DeploymentMode::Remote,
            (Some(_), Some(_)) => DeploymentMode::CachedRemote,
        };
        let mode = self.mode.unwrap_or(derived);

        if self.store.is_none() && self.settings.deployment_hint() != DeploymentMode::Local {
            tracing::warn!(
                servers = ?self.settings.store.servers,
                "store servers configured but no store injected, using local files"
            );
        }
        match mode {
            DeploymentMode::Remote | DeploymentMode::CachedRemote if self.store.is_none() => {
                return Err(ConfigError::LoadError(format!(
                    "Deployment mode {:?} requires a coordination store",
                    mode
                )));
            }
            DeploymentMode::CachedRemote if self.settings.cache.dir.is_none() => {
                return Err(ConfigError::LoadError(
                    "Deployment mode CachedRemote requires a cache directory".to_string(),
                ));
            }
            _ => {}
        }

        let scheduler = match (mode, self.scheduler) {
            (_, Some(scheduler)) => Some(scheduler),
            (DeploymentMode::CachedRemote, None) => Some(Arc::new(Scheduler::new()?)),
            _ => None,
        };

        #[cfg(feature = "file-watch")]
        let watcher = match (mode, self.watcher) {
            (_, Some(watcher)) => Some(watcher),
            (DeploymentMode::Remote, None) => None,
            (_, None) => {
                let watcher = LocalFileWatcher::new(self.settings.watcher.clone())?;
                #[cfg(feature = "metrics")]
                if let Some(metrics) = &self.metrics {
                    watcher.set_metrics(metrics.clone());
                }
                Some(Arc::new(watcher))
            }
        };

        let identity = self
            .identity
            .unwrap_or_else(|| self.settings.process.clone());

        Ok(ConfigRegistry::from_parts(RegistryParts {
            mode,
            settings: self.settings,
            identity,
            store: self.store,
            scheduler,
            #[cfg(feature = "file-watch")]
            watcher,
            #[cfg(feature = "metrics")]
            metrics: self.metrics,
        }))
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
