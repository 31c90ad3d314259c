//! Administrative writes against the coordination store.
//!
//! Unlike the consumer path, these surface failures to the caller. They are meant for
//! publishing tools and tests that seed the store.

use super::{Acl, CoordinationStore, make_path};
use crate::error::{Result, StoreError};

/// Make sure `path` exists, creating it (and its parents) with empty data if needed.
///
/// # Errors
///
/// Returns an error if the store rejects the creation for any reason other than the node
/// already existing.
pub fn ensure_path(store: &dyn CoordinationStore, path: &str) -> Result<String> {
    let path = make_path(path, "");
    match store.create(&path, &[]) {
        Ok(()) | Err(StoreError::NodeExists { .. }) => Ok(path),
        Err(e) => Err(e.into()),
    }
}

/// Publish `content` as the override `leaf` of the configuration rooted at `base`.
///
/// Existing leaves are overwritten in place; missing ones are created.
///
/// # Examples
///
/// ```rust
/// use confcenter::store::{publish, CoordinationStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// publish(&store, "/cms/config/app.ini", "production", b"pool.size=20").unwrap();
/// publish(&store, "/cms/config/app.ini", "production", b"pool.size=40").unwrap();
/// assert_eq!(
///     store.get_data("/cms/config/app.ini/production", None).unwrap(),
///     b"pool.size=40"
/// );
/// ```
///
/// # Errors
///
/// Returns an error if the store is unavailable or rejects the write.
pub fn publish(
    store: &dyn CoordinationStore,
    base: &str,
    leaf: &str,
    content: &[u8],
) -> Result<()> {
    let path = make_path(base, leaf);
    match store.set_data(&path, content) {
        Ok(()) => {}
        Err(e) if e.is_not_found() => store.create(&path, content)?,
        Err(e) => return Err(e.into()),
    }
    tracing::info!(path = %path, bytes = content.len(), "published configuration");
    Ok(())
}

/// Remove `path` and everything below it. Removing an absent path succeeds.
///
/// # Errors
///
/// Returns an error if the store is unavailable or rejects the deletion.
pub fn remove(store: &dyn CoordinationStore, path: &str) -> Result<()> {
    store.delete(path)?;
    tracing::info!(path = %path, "removed configuration");
    Ok(())
}

/// Replace the access control list of `path`. An absent path is ignored.
///
/// # Errors
///
/// Returns an error if the store is unavailable or rejects the change.
pub fn set_acl(store: &dyn CoordinationStore, path: &str, acl: &[Acl]) -> Result<()> {
    match store.set_acl(path, acl) {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
