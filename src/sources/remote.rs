//! Coordination store synchronization.
//!
//! [`RemoteSyncEngine`] keeps track of the most specific override that currently exists
//! below a document's base path and reports its bytes whenever they change. The engine
//! is an explicit state machine: every store watch, connection change and start request
//! becomes an [`EngineEvent`] handled by [`RemoteSyncEngine::dispatch`]. Watch callbacks
//! never re-register themselves; each pass reinstalls exactly the watches it needs.

use super::{ContentSource, ContentTarget};
use crate::core::Content;
use crate::store::{
    ConnectionState, CoordinationStore, StateListener, WatchCallback, WatchEvent, WatchEventKind,
    make_path,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock, Weak};

#[cfg(feature = "metrics")]
use crate::metrics::SyncMetrics;

/// Receives every resolved content change.
pub type ResolvedHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Where the engine is in its resolution cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Not started yet.
    Uninitialized,
    /// The base path does not exist; waiting for it to be created.
    WatchingBase,
    /// The named override is the active one.
    LeafFound(String),
    /// The base path exists but no candidate override has content.
    LeafAbsent,
}

/// Input to the engine's transition function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Subscribe, watch the base path and resolve.
    Start,
    /// A watch on the base path fired.
    Base(WatchEvent),
    /// A watch on an override fired.
    Leaf(WatchEvent),
    /// The store connection changed state.
    Connection(ConnectionState),
}

struct EngineState {
    phase: Phase,
    last_content: Option<Vec<u8>>,
    state_listener_installed: bool,
}

/// Watches the coordination store for one document.
///
/// Under `<root>/<name>` each child is an override named after a process identity
/// field. The first candidate (most specific first) that exists with non-empty content
/// wins. Creating a more specific override promotes it, deleting the active one demotes
/// to the next, and a reconnect re-runs the whole protocol from scratch.
///
/// Events are processed one at a time. An event raised while another is being handled
/// (from another thread, or re-entrantly from a handler) is queued and processed by the
/// thread already running the engine, so handler invocations are strictly ordered.
///
/// Store failures other than "not found" abort the current pass and keep the last
/// known state; the next event retries.
///
/// # Examples
///
/// ```rust
/// use confcenter::sources::RemoteSyncEngine;
/// use confcenter::store::{publish, MemoryStore};
/// use parking_lot::Mutex;
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryStore::new());
/// publish(store.as_ref(), "/cms/config/app.ini", "production", b"pool.size=20").unwrap();
///
/// let engine = RemoteSyncEngine::new(
///     "app.ini",
///     "/cms/config",
///     vec!["10.0.0.7".to_string(), "production".to_string()],
///     store.clone(),
/// );
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// engine.set_handler(Arc::new(move |bytes: Vec<u8>| sink.lock().push(bytes)));
/// engine.start();
///
/// publish(store.as_ref(), "/cms/config/app.ini", "10.0.0.7", b"pool.size=40").unwrap();
/// assert_eq!(*seen.lock(), vec![b"pool.size=20".to_vec(), b"pool.size=40".to_vec()]);
/// ```
pub struct RemoteSyncEngine {
    name: String,
    base_path: String,
    candidates: Vec<String>,
    store: Arc<dyn CoordinationStore>,
    this: Weak<Self>,
    base_watch: WatchCallback,
    leaf_watch: WatchCallback,
    handler: OnceLock<ResolvedHandler>,
    state: Mutex<EngineState>,
    pending: Mutex<VecDeque<EngineEvent>>,
    phase: Mutex<Phase>,
    #[cfg(feature = "metrics")]
    metrics: OnceLock<SyncMetrics>,
}

impl RemoteSyncEngine {
    /// Create an engine for document `name` stored below `root`, trying `candidates`
    /// in order. Nothing touches the store until [`start`](Self::start).
    pub fn new(
        name: impl Into<String>,
        root: &str,
        candidates: Vec<String>,
        store: Arc<dyn CoordinationStore>,
    ) -> Arc<Self> {
        let name = name.into();
        let base_path = make_path(root, &name);
        Arc::new_cyclic(|this: &Weak<Self>| {
            let base = this.clone();
            let base_watch: WatchCallback = Arc::new(move |event: WatchEvent| {
                if let Some(engine) = base.upgrade() {
                    engine.dispatch(EngineEvent::Base(event));
                }
            });
            let leaf = this.clone();
            let leaf_watch: WatchCallback = Arc::new(move |event: WatchEvent| {
                if let Some(engine) = leaf.upgrade() {
                    engine.dispatch(EngineEvent::Leaf(event));
                }
            });
            Self {
                name,
                base_path,
                candidates,
                store,
                this: this.clone(),
                base_watch,
                leaf_watch,
                handler: OnceLock::new(),
                state: Mutex::new(EngineState {
                    phase: Phase::Uninitialized,
                    last_content: None,
                    state_listener_installed: false,
                }),
                pending: Mutex::new(VecDeque::new()),
                phase: Mutex::new(Phase::Uninitialized),
                #[cfg(feature = "metrics")]
                metrics: OnceLock::new(),
            }
        })
    }

    /// Set the receiver of resolved content. Only the first call takes effect; returns
    /// whether this call installed the handler.
    pub fn set_handler(&self, handler: ResolvedHandler) -> bool {
        self.handler.set(handler).is_ok()
    }

    /// Attach metrics. Only the first call takes effect.
    #[cfg(feature = "metrics")]
    pub fn set_metrics(&self, metrics: SyncMetrics) {
        let _ = self.metrics.set(metrics);
    }

    /// Start (or restart) synchronization.
    pub fn start(&self) {
        self.dispatch(EngineEvent::Start);
    }

    /// Feed an event into the engine.
    ///
    /// The event is handled before this returns unless another thread is currently
    /// running the engine, in which case that thread handles it.
    pub fn dispatch(&self, event: EngineEvent) {
        self.pending.lock().push_back(event);
        loop {
            let Some(mut state) = self.state.try_lock() else {
                return;
            };
            loop {
                let next = self.pending.lock().pop_front();
                let Some(event) = next else {
                    break;
                };
                self.apply(&mut state, event);
                *self.phase.lock() = state.phase.clone();
            }
            drop(state);
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase.lock().clone()
    }

    /// Name of the override currently supplying content, if any.
    pub fn active_leaf(&self) -> Option<String> {
        match self.phase() {
            Phase::LeafFound(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// The document's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path below which the overrides live.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Candidate override names, most specific first.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    fn apply(&self, state: &mut EngineState, event: EngineEvent) {
        tracing::trace!(name = %self.name, ?event, phase = ?state.phase, "engine event");
        match event {
            EngineEvent::Start => self.begin(state),
            EngineEvent::Base(WatchEvent {
                kind: WatchEventKind::NodeDataChanged,
                ..
            }) => self.arm_base(),
            EngineEvent::Base(_) => self.begin(state),
            EngineEvent::Leaf(_) => self.resolve(state),
            EngineEvent::Connection(ConnectionState::Reconnected) => {
                tracing::info!(name = %self.name, "store reconnected, resynchronizing");
                state.last_content = None;
                self.begin(state);
            }
            EngineEvent::Connection(ConnectionState::Connected) => {
                tracing::debug!(name = %self.name, "store connected");
            }
            EngineEvent::Connection(other) => {
                tracing::warn!(name = %self.name, state = ?other, "store connection interrupted");
            }
        }
    }

    fn begin(&self, state: &mut EngineState) {
        if !state.state_listener_installed {
            let this = self.this.clone();
            let listener: StateListener = Arc::new(move |connection: ConnectionState| {
                if let Some(engine) = this.upgrade() {
                    engine.dispatch(EngineEvent::Connection(connection));
                }
            });
            self.store.add_state_listener(listener);
            state.state_listener_installed = true;
        }
        match self
            .store
            .exists(&self.base_path, Some(Arc::clone(&self.base_watch)))
        {
            Ok(true) => self.resolve(state),
            Ok(false) => {
                tracing::debug!(name = %self.name, path = %self.base_path, "base path absent");
                state.phase = Phase::WatchingBase;
                self.emit(state, None, Vec::new());
            }
            Err(e) => self.abort(&e),
        }
    }

    fn arm_base(&self) {
        if let Err(e) = self
            .store
            .exists(&self.base_path, Some(Arc::clone(&self.base_watch)))
        {
            self.abort(&e);
        }
    }

    fn resolve(&self, state: &mut EngineState) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = self.metrics.get() {
            metrics.record_pass(&self.name);
        }

        let children = match self
            .store
            .children(&self.base_path, Some(Arc::clone(&self.base_watch)))
        {
            Ok(children) => children,
            Err(e) if e.is_not_found() => {
                state.phase = Phase::WatchingBase;
                self.arm_base();
                self.emit(state, None, Vec::new());
                return;
            }
            Err(e) => return self.abort(&e),
        };

        for leaf in &self.candidates {
            if !children.iter().any(|child| child == leaf) {
                continue;
            }
            let path = make_path(&self.base_path, leaf);
            match self.store.get_data(&path, Some(Arc::clone(&self.leaf_watch))) {
                Ok(data) if !data.is_empty() => {
                    state.phase = Phase::LeafFound(leaf.clone());
                    self.emit(state, Some(leaf), data);
                    return;
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return self.abort(&e),
            }
        }

        tracing::debug!(name = %self.name, "no override with content");
        state.phase = Phase::LeafAbsent;
        self.arm_base();
        self.emit(state, None, Vec::new());
    }

    fn emit(&self, state: &mut EngineState, leaf: Option<&str>, bytes: Vec<u8>) {
        if state.last_content.as_deref() == Some(bytes.as_slice()) {
            tracing::debug!(name = %self.name, "content unchanged");
            return;
        }
        tracing::info!(
            name = %self.name,
            leaf = leaf.unwrap_or("-"),
            bytes = bytes.len(),
            "resolved remote content"
        );
        state.last_content = Some(bytes.clone());
        if let Some(handler) = self.handler.get() {
            handler(bytes);
        }
    }

    fn abort(&self, error: &crate::error::StoreError) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = self.metrics.get() {
            metrics.record_failure(&self.name);
        }
        tracing::error!(
            name = %self.name,
            path = %self.base_path,
            error = %error,
            "resolution pass failed, keeping previous state"
        );
    }
}

impl std::fmt::Debug for RemoteSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSyncEngine")
            .field("name", &self.name)
            .field("base_path", &self.base_path)
            .field("candidates", &self.candidates)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Document source backed only by the coordination store.
///
/// The document starts empty and receives the resolved override as soon as the engine
/// has read it.
pub struct RemoteSource {
    engine: Arc<RemoteSyncEngine>,
}

impl RemoteSource {
    /// Wrap `engine`.
    pub fn new(engine: Arc<RemoteSyncEngine>) -> Self {
        Self { engine }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<RemoteSyncEngine> {
        &self.engine
    }
}

impl ContentSource for RemoteSource {
    fn name(&self) -> String {
        format!("remote:{}", self.engine.base_path())
    }

    fn resolve_initial(&self) -> Content {
        Content::empty()
    }

    fn start(self: Arc<Self>, target: ContentTarget) {
        self.engine.set_handler(Arc::new(move |bytes: Vec<u8>| {
            target.offer(bytes);
        }));
        self.engine.start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Document;
    use crate::store::{MemoryStore, publish, remove};

    const ROOT: &str = "/cms/config";
    const BASE: &str = "/cms/config/app.ini";

    fn candidates() -> Vec<String> {
        ["10.0.0.1:8080", "10.0.0.1", "production", "orders"]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    fn recording_engine(store: &Arc<MemoryStore>) -> (Arc<RemoteSyncEngine>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let engine = RemoteSyncEngine::new("app.ini", ROOT, candidates(), store.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.set_handler(Arc::new(move |bytes: Vec<u8>| sink.lock().push(bytes)));
        (engine, seen)
    }

    fn remote_document(store: &Arc<MemoryStore>) -> (Arc<Document>, Arc<RemoteSyncEngine>) {
        let engine = RemoteSyncEngine::new("app.ini", ROOT, candidates(), store.clone());
        let doc = Document::from_source("app.ini", Arc::new(RemoteSource::new(engine.clone())));
        (doc, engine)
    }

    #[test]
    fn test_most_specific_override_wins() {
        let store = Arc::new(MemoryStore::new());
        publish(store.as_ref(), BASE, "orders", b"level=name").unwrap();
        publish(store.as_ref(), BASE, "production", b"level=profile").unwrap();

        let (doc, engine) = remote_document(&store);
        assert_eq!(doc.get("level").as_deref(), Some("profile"));
        assert_eq!(engine.active_leaf().as_deref(), Some("production"));
    }

    #[test]
    fn test_empty_override_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        publish(store.as_ref(), BASE, "10.0.0.1", b"").unwrap();
        publish(store.as_ref(), BASE, "orders", b"level=name").unwrap();

        let (doc, engine) = remote_document(&store);
        assert_eq!(doc.get("level").as_deref(), Some("name"));
        assert_eq!(engine.phase(), Phase::LeafFound("orders".to_string()));

        // filling the empty override promotes it
        publish(store.as_ref(), BASE, "10.0.0.1", b"level=ip").unwrap();
        assert_eq!(doc.get("level").as_deref(), Some("ip"));
    }

    #[test]
    fn test_promotion_and_demotion() {
        let store = Arc::new(MemoryStore::new());
        publish(store.as_ref(), BASE, "production", b"level=profile").unwrap();
        let (doc, engine) = remote_document(&store);

        publish(store.as_ref(), BASE, "10.0.0.1:8080", b"level=instance").unwrap();
        assert_eq!(doc.get("level").as_deref(), Some("instance"));
        assert_eq!(engine.active_leaf().as_deref(), Some("10.0.0.1:8080"));

        remove(store.as_ref(), &format!("{BASE}/10.0.0.1:8080")).unwrap();
        assert_eq!(doc.get("level").as_deref(), Some("profile"));
        assert_eq!(engine.active_leaf().as_deref(), Some("production"));

        remove(store.as_ref(), &format!("{BASE}/production")).unwrap();
        assert!(doc.content().is_empty());
        assert_eq!(engine.phase(), Phase::LeafAbsent);
    }

    #[test]
    fn test_base_created_after_start() {
        let store = Arc::new(MemoryStore::new());
        let (doc, engine) = remote_document(&store);
        assert_eq!(engine.phase(), Phase::WatchingBase);
        assert!(doc.content().is_empty());

        publish(store.as_ref(), BASE, "orders", b"a=1").unwrap();
        assert_eq!(doc.get_int("a", 0), 1);

        remove(store.as_ref(), BASE).unwrap();
        assert!(doc.content().is_empty());
        assert_eq!(engine.phase(), Phase::WatchingBase);

        publish(store.as_ref(), BASE, "orders", b"a=2").unwrap();
        assert_eq!(doc.get_int("a", 0), 2);
    }

    #[test]
    fn test_content_change_on_active_leaf() {
        let store = Arc::new(MemoryStore::new());
        publish(store.as_ref(), BASE, "production", b"a=1").unwrap();
        let (engine, seen) = recording_engine(&store);
        engine.start();

        publish(store.as_ref(), BASE, "production", b"a=2").unwrap();
        publish(store.as_ref(), BASE, "production", b"a=2").unwrap();
        assert_eq!(*seen.lock(), vec![b"a=1".to_vec(), b"a=2".to_vec()]);
    }

    #[test]
    fn test_identical_content_is_suppressed() {
        let store = Arc::new(MemoryStore::new());
        publish(store.as_ref(), BASE, "production", b"a=1").unwrap();
        let (engine, seen) = recording_engine(&store);
        engine.start();

        // a less specific override appearing does not change the resolved bytes
        publish(store.as_ref(), BASE, "orders", b"a=0").unwrap();
        // a more specific override with identical bytes is not reported either
        publish(store.as_ref(), BASE, "10.0.0.1", b"a=1").unwrap();
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(engine.active_leaf().as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_listener_notified_once_per_change() {
        let store = Arc::new(MemoryStore::new());
        publish(store.as_ref(), BASE, "production", b"a=1").unwrap();
        let (doc, _engine) = remote_document(&store);

        let count = Arc::new(Mutex::new(0));
        let inner = Arc::clone(&count);
        doc.add_listener(Arc::new(move |_: &Document| *inner.lock() += 1), false);

        publish(store.as_ref(), BASE, "production", b"a=1").unwrap();
        assert_eq!(*count.lock(), 0);
        publish(store.as_ref(), BASE, "production", b"a=2").unwrap();
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_transient_failure_keeps_state() {
        let store = Arc::new(MemoryStore::new());
        publish(store.as_ref(), BASE, "production", b"a=1").unwrap();
        let (doc, engine) = remote_document(&store);

        store.disconnect();
        engine.dispatch(EngineEvent::Leaf(WatchEvent::new(
            WatchEventKind::NodeDataChanged,
            format!("{BASE}/production"),
        )));
        assert_eq!(doc.get_int("a", 0), 1);
        assert_eq!(engine.active_leaf().as_deref(), Some("production"));
    }

    #[test]
    fn test_reconnect_reinstalls_watches() {
        let store = Arc::new(MemoryStore::new());
        publish(store.as_ref(), BASE, "production", b"a=1").unwrap();
        let (doc, _engine) = remote_document(&store);

        store.expire_session();
        assert_eq!(store.watch_count(), 0);
        store.reconnect();
        assert!(store.watch_count() > 0);

        publish(store.as_ref(), BASE, "production", b"a=2").unwrap();
        assert_eq!(doc.get_int("a", 0), 2);
    }

    #[test]
    fn test_reconnect_resynchronizes() {
        let store = Arc::new(MemoryStore::new());
        publish(store.as_ref(), BASE, "production", b"a=1").unwrap();
        let (engine, seen) = recording_engine(&store);
        engine.start();

        store.expire_session();
        store.reconnect();
        // resynchronizing reports the current content again
        assert_eq!(*seen.lock(), vec![b"a=1".to_vec(), b"a=1".to_vec()]);

        publish(store.as_ref(), BASE, "10.0.0.1", b"a=3").unwrap();
        assert_eq!(seen.lock().last().map(Vec::as_slice), Some(b"a=3".as_slice()));
    }

    #[test]
    fn test_state_listener_installed_once() {
        let store = Arc::new(MemoryStore::new());
        let (engine, seen) = recording_engine(&store);
        engine.start();
        engine.start();
        engine.start();

        publish(store.as_ref(), BASE, "orders", b"a=1").unwrap();
        store.disconnect();
        store.reconnect();
        // first read is empty, then the override, then one resync after reconnect
        assert_eq!(
            *seen.lock(),
            vec![Vec::new(), b"a=1".to_vec(), b"a=1".to_vec()]
        );
    }

    #[test]
    fn test_reentrant_dispatch_is_queued() {
        let store = Arc::new(MemoryStore::new());
        publish(store.as_ref(), BASE, "orders", b"a=1").unwrap();
        let engine = RemoteSyncEngine::new("app.ini", ROOT, candidates(), store.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let writer = Arc::clone(&store);
        engine.set_handler(Arc::new(move |bytes: Vec<u8>| {
            let first = sink.lock().is_empty();
            sink.lock().push(bytes);
            if first {
                // writing from inside the handler fires a watch on this thread
                publish(writer.as_ref(), BASE, "production", b"a=2").unwrap();
            }
        }));
        engine.start();

        assert_eq!(*seen.lock(), vec![b"a=1".to_vec(), b"a=2".to_vec()]);
        assert_eq!(engine.active_leaf().as_deref(), Some("production"));
    }
}
