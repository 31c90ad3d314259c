//! Coordination store boundary.
//!
//! The sync engine consumes a hierarchical, watchable byte tree through
//! [`CoordinationStore`]. Watches are one-shot: a callback fires at most once and must be
//! reinstalled by whoever wants further events. [`MemoryStore`] is a complete in-process
//! implementation used for tests and single-process deployments.

mod admin;
mod memory;

pub use admin::{ensure_path, publish, remove, set_acl};
pub use memory::MemoryStore;

use crate::error::StoreResult;
use std::sync::Arc;

/// Kind of change reported by a fired watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    /// A watched node was created.
    NodeCreated,
    /// A watched node was deleted.
    NodeDeleted,
    /// A watched node's data changed.
    NodeDataChanged,
    /// A child was added to or removed from a watched node.
    NodeChildrenChanged,
}

/// A fired watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// What happened
    pub kind: WatchEventKind,
    /// The watched path
    pub path: String,
}

impl WatchEvent {
    /// Create a watch event.
    pub fn new(kind: WatchEventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// One-shot watch callback.
///
/// Registering the same `Arc` twice on the same path and watch type is a no-op, and a
/// single mutation fires a given callback at most once.
pub type WatchCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Connection state transitions reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Initial connection established.
    Connected,
    /// Connection interrupted; the session may still be alive.
    Suspended,
    /// Session lost; all watches are gone.
    Lost,
    /// Connection re-established after a suspension or loss.
    Reconnected,
}

/// Connection state subscriber.
pub type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Access control entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    /// Authentication scheme, e.g. `world` or `digest`
    pub scheme: String,
    /// Identity within the scheme
    pub id: String,
    /// Permission bits (see the associated constants)
    pub perms: u32,
}

impl Acl {
    /// Read permission.
    pub const READ: u32 = 1;
    /// Write permission.
    pub const WRITE: u32 = 1 << 1;
    /// Create-children permission.
    pub const CREATE: u32 = 1 << 2;
    /// Delete-children permission.
    pub const DELETE: u32 = 1 << 3;
    /// Set-ACL permission.
    pub const ADMIN: u32 = 1 << 4;
    /// Every permission.
    pub const ALL: u32 = Self::READ | Self::WRITE | Self::CREATE | Self::DELETE | Self::ADMIN;

    /// Create an access control entry.
    pub fn new(scheme: impl Into<String>, id: impl Into<String>, perms: u32) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
            perms,
        }
    }

    /// Unrestricted access for everyone.
    pub fn open() -> Self {
        Self::new("world", "anyone", Self::ALL)
    }
}

/// A hierarchical, watchable byte tree.
///
/// Read operations optionally install a one-shot watch. `StoreError::NotFound` is the
/// distinguished "absent" outcome; callers on the consumer path treat every other error
/// as transient.
pub trait CoordinationStore: Send + Sync {
    /// Check whether `path` exists, optionally watching for its creation, deletion or
    /// data change. The watch is installed even when the node is absent.
    fn exists(&self, path: &str, watch: Option<WatchCallback>) -> StoreResult<bool>;

    /// List the child names of `path`, optionally watching for membership changes.
    fn children(&self, path: &str, watch: Option<WatchCallback>) -> StoreResult<Vec<String>>;

    /// Read the bytes stored at `path`, optionally watching for data changes.
    fn get_data(&self, path: &str, watch: Option<WatchCallback>) -> StoreResult<Vec<u8>>;

    /// Create `path` with `data`, creating missing parents with empty data.
    fn create(&self, path: &str, data: &[u8]) -> StoreResult<()>;

    /// Replace the bytes stored at an existing `path`.
    fn set_data(&self, path: &str, data: &[u8]) -> StoreResult<()>;

    /// Delete `path` and all of its descendants. Deleting an absent path succeeds.
    fn delete(&self, path: &str) -> StoreResult<()>;

    /// Read the access control list of `path`.
    fn get_acl(&self, path: &str) -> StoreResult<Vec<Acl>>;

    /// Replace the access control list of `path`.
    fn set_acl(&self, path: &str, acl: &[Acl]) -> StoreResult<()>;

    /// Subscribe to connection state changes.
    fn add_state_listener(&self, listener: StateListener);

    /// Get a human-readable name for this store (for logging/debugging).
    fn name(&self) -> String {
        "store".to_string()
    }
}

/// Join `child` under `parent`, normalizing slashes. The result always starts with `/`
/// and never ends with one (except for the root itself).
pub fn make_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_matches('/');
    let child = child.trim_matches('/');
    let mut path = String::with_capacity(parent.len() + child.len() + 2);
    path.push('/');
    path.push_str(parent);
    if !parent.is_empty() && !child.is_empty() {
        path.push('/');
    }
    path.push_str(child);
    path
}
