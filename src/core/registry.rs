//! Process-wide document registry.

use crate::core::{
    DeploymentMode, Document, MergedConfigView, ProcessIdentity, RegistryBuilder, Scheduler,
    Settings,
};
use crate::notify::ChangeListener;
use crate::sources::{
    ContentSource, LocalCacheOverlay, LocalFileSource, RemoteSource, RemoteSyncEngine,
};
use crate::store::CoordinationStore;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(feature = "file-watch")]
use crate::notify::LocalFileWatcher;

#[cfg(feature = "metrics")]
use crate::metrics::SyncMetrics;

/// Characters separating the names of a composite lookup, besides whitespace.
const NAME_SEPARATORS: [char; 3] = [',', ';', '|'];

/// Name → document cache with lock-free lookups.
///
/// The first request for a name builds its document according to the
/// [`DeploymentMode`]; every later request returns the same instance. A composite name
/// such as `"local.ini, shared.ini"` yields a merged view over the listed documents,
/// highest priority first.
///
/// # Examples
///
/// ```rust
/// use confcenter::prelude::*;
/// use confcenter::store::{publish, MemoryStore};
/// use std::sync::Arc;
///
/// # fn main() -> confcenter::error::Result<()> {
/// let store = Arc::new(MemoryStore::new());
/// publish(store.as_ref(), "/cms/config/app.ini", "orders", b"pool.size=20")?;
///
/// let registry = ConfigRegistry::builder()
///     .with_identity(ProcessIdentity::named("orders"))
///     .with_store(store)
///     .build()?;
/// assert_eq!(registry.mode(), DeploymentMode::Remote);
///
/// let doc = registry.get_config("app.ini");
/// assert_eq!(doc.get_int("pool.size", 1), 20);
/// assert!(Arc::ptr_eq(&doc, &registry.get_config("app.ini")));
/// # Ok(())
/// # }
/// ```
pub struct ConfigRegistry {
    documents: ArcSwap<HashMap<String, Arc<Document>>>,
    construction: Mutex<()>,
    mode: DeploymentMode,
    settings: Settings,
    candidates: Vec<String>,
    local_dir: PathBuf,
    store: Option<Arc<dyn CoordinationStore>>,
    scheduler: Option<Arc<Scheduler>>,
    #[cfg(feature = "file-watch")]
    watcher: Option<Arc<LocalFileWatcher>>,
    #[cfg(feature = "metrics")]
    metrics: Option<SyncMetrics>,
}

/// Everything the registry needs to construct documents; assembled by the builder.
pub(crate) struct RegistryParts {
    pub(crate) mode: DeploymentMode,
    pub(crate) settings: Settings,
    pub(crate) identity: ProcessIdentity,
    pub(crate) store: Option<Arc<dyn CoordinationStore>>,
    pub(crate) scheduler: Option<Arc<Scheduler>>,
    #[cfg(feature = "file-watch")]
    pub(crate) watcher: Option<Arc<LocalFileWatcher>>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Option<SyncMetrics>,
}

impl ConfigRegistry {
    /// Create a new builder for configuring the registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub(crate) fn from_parts(parts: RegistryParts) -> Self {
        let local_dir = parts
            .settings
            .cache
            .dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let candidates = parts.identity.candidates();
        tracing::info!(
            mode = ?parts.mode,
            base_path = %parts.settings.store.base_path,
            candidates = ?candidates,
            "configuration registry ready"
        );
        Self {
            documents: ArcSwap::from_pointee(HashMap::new()),
            construction: Mutex::new(()),
            mode: parts.mode,
            settings: parts.settings,
            candidates,
            local_dir,
            store: parts.store,
            scheduler: parts.scheduler,
            #[cfg(feature = "file-watch")]
            watcher: parts.watcher,
            #[cfg(feature = "metrics")]
            metrics: parts.metrics,
        }
    }

    /// Get the document for `name`, building it on first use.
    ///
    /// Names are trimmed. A name listing two or more documents separated by `,` `;` `|`
    /// or whitespace yields a merged view; the view itself is cached under the
    /// comma-joined list.
    pub fn get_config(&self, name: &str) -> Arc<Document> {
        let tokens = split_names(name);
        if tokens.len() < 2 {
            let Some(name) = tokens.into_iter().next() else {
                tracing::warn!("empty configuration name, returning a detached document");
                return Arc::new(Document::new(""));
            };
            return self.get_or_create(&name, |registry| registry.construct(&name));
        }

        let key = tokens.join(",");
        if let Some(doc) = self.documents.load().get(&key) {
            return Arc::clone(doc);
        }
        let members: Vec<_> = tokens.iter().map(|token| self.get_config(token)).collect();
        self.get_or_create(&key, move |_| MergedConfigView::document(members))
    }

    /// Get the document for `name` and register `listener` on it.
    pub fn get_config_with(
        &self,
        name: &str,
        listener: Arc<dyn ChangeListener>,
        fire_immediately: bool,
    ) -> Arc<Document> {
        let doc = self.get_config(name);
        doc.add_listener(listener, fire_immediately);
        doc
    }

    /// Whether the document for `name` has been built already.
    pub fn has_config(&self, name: &str) -> bool {
        self.documents.load().contains_key(&split_names(name).join(","))
    }

    /// Names of all documents built so far, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.documents.load().keys().cloned().collect();
        names.sort();
        names
    }

    /// How documents obtain their content.
    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    /// The settings the registry was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Candidate override names, most specific first.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    fn get_or_create<F>(&self, key: &str, build: F) -> Arc<Document>
    where
        F: FnOnce(&Self) -> Arc<Document>,
    {
        if let Some(doc) = self.documents.load().get(key) {
            return Arc::clone(doc);
        }
        let _construction = self.construction.lock();
        if let Some(doc) = self.documents.load().get(key) {
            return Arc::clone(doc);
        }
        let doc = build(self);
        let mut documents = HashMap::clone(&self.documents.load());
        documents.insert(key.to_string(), Arc::clone(&doc));
        self.documents.store(Arc::new(documents));
        doc
    }

    fn construct(&self, name: &str) -> Arc<Document> {
        let source: Arc<dyn ContentSource> = match (self.mode, &self.store) {
            (DeploymentMode::Remote, Some(store)) => {
                Arc::new(RemoteSource::new(self.engine(name, store)))
            }
            (DeploymentMode::CachedRemote, Some(store)) => self.cached(name, store),
            _ => self.local(name),
        };
        tracing::info!(name = %name, source = %source.name(), "building document");
        Document::from_source(name, source)
    }

    fn engine(&self, name: &str, store: &Arc<dyn CoordinationStore>) -> Arc<RemoteSyncEngine> {
        let engine = RemoteSyncEngine::new(
            name,
            &self.settings.store.base_path,
            self.candidates.clone(),
            Arc::clone(store),
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            engine.set_metrics(metrics.clone());
        }
        engine
    }

    fn cached(&self, name: &str, store: &Arc<dyn CoordinationStore>) -> Arc<dyn ContentSource> {
        let Some(scheduler) = &self.scheduler else {
            return Arc::new(RemoteSource::new(self.engine(name, store)));
        };
        let cache = &self.settings.cache;
        let overlay = LocalCacheOverlay::new(
            self.engine(name, store),
            self.local_dir.join(name),
            Arc::clone(scheduler),
        )
        .with_sync_delay(cache.sync_delay(), cache.sync_jitter());
        #[cfg(feature = "file-watch")]
        let overlay = match &self.watcher {
            Some(watcher) => overlay.with_watcher(Arc::clone(watcher)),
            None => overlay,
        };
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            overlay.set_metrics(metrics.clone());
        }
        Arc::new(overlay)
    }

    fn local(&self, name: &str) -> Arc<dyn ContentSource> {
        let source = LocalFileSource::new(self.local_dir.join(name));
        #[cfg(feature = "file-watch")]
        let source = match &self.watcher {
            Some(watcher) => source.with_watcher(Arc::clone(watcher)),
            None => source,
        };
        Arc::new(source)
    }
}

impl std::fmt::Debug for ConfigRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRegistry")
            .field("mode", &self.mode)
            .field("candidates", &self.candidates)
            .field("documents", &self.names())
            .finish()
    }
}

/// Split a lookup name into its document names: separated by `,` `;` `|` or
/// whitespace, trimmed, empties dropped.
pub fn split_names(name: &str) -> Vec<String> {
    name.split(|c: char| NAME_SEPARATORS.contains(&c) || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
