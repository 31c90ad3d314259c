//! Composite documents.

use crate::core::{Content, Document, KvMap};
use crate::notify::ChangeListener;
use crate::sources::{ContentSource, ContentTarget};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Content source combining several documents into one key/value view.
///
/// Members are listed highest priority first: for a key present in several members,
/// the earliest member wins. Any member change re-merges the latest state of every
/// member and notifies the composite document's listeners. Members are shared, not
/// owned; they keep living in the registry.
///
/// # Examples
///
/// ```rust
/// use confcenter::core::{Document, MergedConfigView};
/// use std::sync::Arc;
///
/// let local = Arc::new(Document::with_content("local.ini", b"k=1".to_vec()));
/// let shared = Arc::new(Document::with_content("shared.ini", b"k=2\nj=x".to_vec()));
///
/// let merged = MergedConfigView::document(vec![local.clone(), shared.clone()]);
/// assert_eq!(merged.name(), "local.ini,shared.ini");
/// assert_eq!(merged.get("k").as_deref(), Some("1"));
/// assert_eq!(merged.get("j").as_deref(), Some("x"));
///
/// local.offer(b"k=3".to_vec());
/// assert_eq!(merged.get("k").as_deref(), Some("3"));
/// ```
pub struct MergedConfigView {
    members: Vec<Arc<Document>>,
    registered: Mutex<Vec<(Weak<Document>, Arc<dyn ChangeListener>)>>,
}

impl MergedConfigView {
    /// Create a view over `members`, highest priority first.
    pub fn new(members: Vec<Arc<Document>>) -> Self {
        Self {
            members,
            registered: Mutex::new(Vec::new()),
        }
    }

    /// Create the composite document for `members`, named after them.
    pub fn document(members: Vec<Arc<Document>>) -> Arc<Document> {
        let view = Arc::new(Self::new(members));
        Document::from_source(view.name(), view)
    }

    /// The member documents, highest priority first.
    pub fn members(&self) -> &[Arc<Document>] {
        &self.members
    }

    /// Merge the current state of all members.
    pub fn merge(&self) -> KvMap {
        let mut merged = KvMap::new();
        for member in self.members.iter().rev() {
            for (key, value) in member.all().iter() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

impl ContentSource for MergedConfigView {
    fn name(&self) -> String {
        self.members
            .iter()
            .map(|member| member.name())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn resolve_initial(&self) -> Content {
        Content::from_map(self.merge())
    }

    fn start(self: Arc<Self>, target: ContentTarget) {
        let mut registered = self.registered.lock();
        for member in &self.members {
            let view = Arc::downgrade(&self);
            let target = target.clone();
            let listener: Arc<dyn ChangeListener> = Arc::new(move |changed: &Document| {
                if let Some(view) = view.upgrade() {
                    tracing::debug!(member = %changed.name(), "member changed, re-merging");
                    target.publish(Content::from_map(view.merge()));
                }
            });
            member.add_listener(Arc::clone(&listener), false);
            registered.push((Arc::downgrade(member), listener));
        }
    }
}

impl Drop for MergedConfigView {
    fn drop(&mut self) {
        for (member, listener) in self.registered.get_mut().drain(..) {
            if let Some(member) = member.upgrade() {
                member.remove_listener(&listener);
            }
        }
    }
}
