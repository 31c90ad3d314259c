//! Content source trait.

use crate::core::{Content, Document};
use std::sync::{Arc, Weak};

/// Where a [`Document`] gets its bytes from.
///
/// A source supplies the initial content synchronously and then pushes later changes
/// through the [`ContentTarget`] it is started with. Implement this trait to feed
/// documents from something other than the built-in store, cache and file sources.
pub trait ContentSource: Send + Sync {
    /// Get a human-readable name for this source (for logging/debugging).
    fn name(&self) -> String;

    /// Content the document holds before the source is started.
    fn resolve_initial(&self) -> Content;

    /// Begin delivering changes into `target`. Called once, right after the document is
    /// created with the result of [`resolve_initial`](Self::resolve_initial).
    fn start(self: Arc<Self>, target: ContentTarget);
}

/// The document a source writes into.
///
/// Holds the document weakly: once the document is gone, deliveries are dropped.
#[derive(Clone)]
pub struct ContentTarget {
    doc: Weak<Document>,
}

impl ContentTarget {
    /// Create a target for `doc`.
    pub fn new(doc: &Arc<Document>) -> Self {
        Self {
            doc: Arc::downgrade(doc),
        }
    }

    /// Offer new bytes; applied and broadcast only if they differ from the current
    /// content. Returns whether the document changed.
    pub fn offer(&self, bytes: Vec<u8>) -> bool {
        self.doc.upgrade().is_some_and(|doc| doc.offer(bytes))
    }

    /// Install `content` and broadcast unconditionally.
    pub fn publish(&self, content: Content) {
        if let Some(doc) = self.doc.upgrade() {
            doc.publish(content);
        }
    }

    /// Current content of the document, if it is still alive.
    pub fn current(&self) -> Option<Arc<Content>> {
        self.doc.upgrade().map(|doc| doc.snapshot())
    }

    /// Name of the document, if it is still alive.
    pub fn name(&self) -> Option<String> {
        self.doc.upgrade().map(|doc| doc.name().to_string())
    }
}

impl std::fmt::Debug for ContentTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentTarget")
            .field("name", &self.name())
            .finish()
    }
}
