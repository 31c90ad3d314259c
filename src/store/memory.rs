//! In-process coordination store.

use super::{
    Acl, ConnectionState, CoordinationStore, StateListener, WatchCallback, WatchEvent,
    WatchEventKind, make_path,
};
use crate::error::{StoreError, StoreResult};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type WatchTable = HashMap<String, Vec<WatchCallback>>;

struct Node {
    data: Vec<u8>,
    acl: Vec<Acl>,
}

impl Node {
    fn new(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            acl: vec![Acl::open()],
        }
    }
}

struct Tree {
    nodes: BTreeMap<String, Node>,
    exist_watches: WatchTable,
    data_watches: WatchTable,
    child_watches: WatchTable,
}

/// Watches fired by one mutation, delivered after the tree lock is released.
#[derive(Default)]
struct Fired(Vec<(WatchCallback, WatchEvent)>);

impl Fired {
    fn push_all(&mut self, callbacks: Vec<WatchCallback>, kind: WatchEventKind, path: &str) {
        for callback in callbacks {
            let event = WatchEvent::new(kind, path);
            let duplicate = self
                .0
                .iter()
                .any(|(cb, ev)| Arc::ptr_eq(cb, &callback) && *ev == event);
            if !duplicate {
                self.0.push((callback, event));
            }
        }
    }

    fn deliver(self) {
        for (callback, event) in self.0 {
            callback(event);
        }
    }
}

fn register(table: &mut WatchTable, path: &str, watch: Option<WatchCallback>) {
    if let Some(watch) = watch {
        let watches = table.entry(path.to_string()).or_default();
        if !watches.iter().any(|w| Arc::ptr_eq(w, &watch)) {
            watches.push(watch);
        }
    }
}

fn take(table: &mut WatchTable, path: &str) -> Vec<WatchCallback> {
    table.remove(path).unwrap_or_default()
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rsplit_once('/') {
        Some(("", _)) => Some("/".to_string()),
        Some((parent, _)) => Some(parent.to_string()),
        None => None,
    }
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::new(&[]));
        Self {
            nodes,
            exist_watches: HashMap::new(),
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
        }
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn insert(&mut self, path: &str, data: &[u8], fired: &mut Fired) {
        self.nodes.insert(path.to_string(), Node::new(data));
        let created = take(&mut self.exist_watches, path);
        fired.push_all(created, WatchEventKind::NodeCreated, path);
        if let Some(parent) = parent_of(path) {
            let siblings = take(&mut self.child_watches, &parent);
            fired.push_all(siblings, WatchEventKind::NodeChildrenChanged, &parent);
        }
    }

    fn remove(&mut self, path: &str, fired: &mut Fired) {
        self.nodes.remove(path);
        let mut deleted = take(&mut self.exist_watches, path);
        deleted.extend(take(&mut self.data_watches, path));
        deleted.extend(take(&mut self.child_watches, path));
        fired.push_all(deleted, WatchEventKind::NodeDeleted, path);
        if let Some(parent) = parent_of(path) {
            let siblings = take(&mut self.child_watches, &parent);
            fired.push_all(siblings, WatchEventKind::NodeChildrenChanged, &parent);
        }
    }
}

/// In-process [`CoordinationStore`] with one-shot watches.
///
/// Fired watches are delivered synchronously on the mutating thread after the internal
/// lock is released, so a watch callback may freely read the store again. Session loss
/// and transient outages can be simulated with [`MemoryStore::disconnect`],
/// [`MemoryStore::expire_session`] and [`MemoryStore::reconnect`].
///
/// # Examples
///
/// ```rust
/// use confcenter::store::{CoordinationStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.create("/cms/config/app.ini/profile", b"a=1").unwrap();
/// assert_eq!(store.get_data("/cms/config/app.ini/profile", None).unwrap(), b"a=1");
/// assert_eq!(store.children("/cms/config/app.ini", None).unwrap(), vec!["profile"]);
/// ```
pub struct MemoryStore {
    tree: Mutex<Tree>,
    state_listeners: RwLock<Vec<StateListener>>,
    available: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store containing only the root node.
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Tree::new()),
            state_listeners: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Interrupt the connection: every operation fails with `ConnectionLoss` until
    /// [`reconnect`](Self::reconnect). Installed watches survive.
    pub fn disconnect(&self) {
        self.available.store(false, Ordering::SeqCst);
        self.emit(ConnectionState::Suspended);
    }

    /// Lose the session: all installed watches are discarded and operations fail until
    /// [`reconnect`](Self::reconnect).
    pub fn expire_session(&self) {
        self.available.store(false, Ordering::SeqCst);
        {
            let mut tree = self.tree.lock();
            tree.exist_watches.clear();
            tree.data_watches.clear();
            tree.child_watches.clear();
        }
        self.emit(ConnectionState::Lost);
    }

    /// Re-establish the connection and announce `Reconnected` to state listeners.
    pub fn reconnect(&self) {
        self.available.store(true, Ordering::SeqCst);
        self.emit(ConnectionState::Reconnected);
    }

    /// Number of watches currently installed (all types).
    pub fn watch_count(&self) -> usize {
        let tree = self.tree.lock();
        [&tree.exist_watches, &tree.data_watches, &tree.child_watches]
            .iter()
            .map(|table| table.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    fn emit(&self, state: ConnectionState) {
        let listeners = self.state_listeners.read().clone();
        tracing::info!(?state, listeners = listeners.len(), "store connection state changed");
        for listener in listeners {
            listener(state);
        }
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::ConnectionLoss)
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinationStore for MemoryStore {
    fn exists(&self, path: &str, watch: Option<WatchCallback>) -> StoreResult<bool> {
        self.check_available()?;
        let path = make_path(path, "");
        let mut tree = self.tree.lock();
        register(&mut tree.exist_watches, &path, watch);
        Ok(tree.nodes.contains_key(&path))
    }

    fn children(&self, path: &str, watch: Option<WatchCallback>) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let path = make_path(path, "");
        let mut tree = self.tree.lock();
        if !tree.nodes.contains_key(&path) {
            return Err(StoreError::not_found(path));
        }
        register(&mut tree.child_watches, &path, watch);
        Ok(tree.child_names(&path))
    }

    fn get_data(&self, path: &str, watch: Option<WatchCallback>) -> StoreResult<Vec<u8>> {
        self.check_available()?;
        let path = make_path(path, "");
        let mut tree = self.tree.lock();
        let data = match tree.nodes.get(&path) {
            Some(node) => node.data.clone(),
            None => return Err(StoreError::not_found(path)),
        };
        register(&mut tree.data_watches, &path, watch);
        Ok(data)
    }

    fn create(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        self.check_available()?;
        let path = make_path(path, "");
        let mut fired = Fired::default();
        {
            let mut tree = self.tree.lock();
            if tree.nodes.contains_key(&path) {
                return Err(StoreError::NodeExists { path });
            }
            let mut missing = Vec::new();
            let mut cursor = parent_of(&path);
            while let Some(ancestor) = cursor {
                if tree.nodes.contains_key(&ancestor) {
                    break;
                }
                cursor = parent_of(&ancestor);
                missing.push(ancestor);
            }
            for ancestor in missing.iter().rev() {
                tree.insert(ancestor, &[], &mut fired);
            }
            tree.insert(&path, data, &mut fired);
        }
        fired.deliver();
        Ok(())
    }

    fn set_data(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        self.check_available()?;
        let path = make_path(path, "");
        let mut fired = Fired::default();
        {
            let mut tree = self.tree.lock();
            match tree.nodes.get_mut(&path) {
                Some(node) => node.data = data.to_vec(),
                None => return Err(StoreError::not_found(path)),
            }
            let mut changed = take(&mut tree.exist_watches, &path);
            changed.extend(take(&mut tree.data_watches, &path));
            fired.push_all(changed, WatchEventKind::NodeDataChanged, &path);
        }
        fired.deliver();
        Ok(())
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        self.check_available()?;
        let path = make_path(path, "");
        if path == "/" {
            return Err(StoreError::Other("cannot delete the root node".to_string()));
        }
        let mut fired = Fired::default();
        {
            let mut tree = self.tree.lock();
            let prefix = format!("{path}/");
            let mut doomed: Vec<String> = tree
                .nodes
                .keys()
                .filter(|key| **key == path || key.starts_with(&prefix))
                .cloned()
                .collect();
            // deepest first, so parents report their children leaving before they go
            doomed.sort_by_key(|key| std::cmp::Reverse(key.matches('/').count()));
            for key in doomed {
                tree.remove(&key, &mut fired);
            }
        }
        fired.deliver();
        Ok(())
    }

    fn get_acl(&self, path: &str) -> StoreResult<Vec<Acl>> {
        self.check_available()?;
        let path = make_path(path, "");
        let tree = self.tree.lock();
        tree.nodes
            .get(&path)
            .map(|node| node.acl.clone())
            .ok_or_else(|| StoreError::not_found(path))
    }

    fn set_acl(&self, path: &str, acl: &[Acl]) -> StoreResult<()> {
        self.check_available()?;
        let path = make_path(path, "");
        let mut tree = self.tree.lock();
        match tree.nodes.get_mut(&path) {
            Some(node) => {
                node.acl = acl.to_vec();
                Ok(())
            }
            None => Err(StoreError::not_found(path)),
        }
    }

    fn add_state_listener(&self, listener: StateListener) {
        self.state_listeners.write().push(listener);
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}
