//! Per-document change notification fan-out.

use crate::core::Document;
use parking_lot::{ReentrantMutex, RwLock};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

/// Callback invoked when a document's content changes.
///
/// Implemented for every `Fn(&Document) + Send + Sync`, so closures can be registered
/// directly. Listeners run synchronously on the thread that detected the change and
/// should be fast: a slow listener delays every listener after it in the same broadcast.
pub trait ChangeListener: Send + Sync {
    /// Called with the document after its content changed.
    fn changed(&self, doc: &Document);
}

impl<F> ChangeListener for F
where
    F: Fn(&Document) + Send + Sync,
{
    fn changed(&self, doc: &Document) {
        self(doc)
    }
}

/// Handle for a subscription that can be dropped to unsubscribe.
///
/// When the handle is dropped, the listener is removed from the document (if the
/// document is still alive).
pub struct SubscriptionHandle {
    listener: Arc<dyn ChangeListener>,
    doc: Weak<Document>,
}

impl SubscriptionHandle {
    pub(crate) fn new(listener: Arc<dyn ChangeListener>, doc: Weak<Document>) -> Self {
        Self { listener, doc }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(doc) = self.doc.upgrade() {
            doc.remove_listener(&self.listener);
        }
    }
}

/// Registry of listeners for one document.
///
/// Listener identity is the `Arc` allocation: registering the same `Arc` twice is a
/// no-op. A listener is never invoked concurrently with itself, and a panicking listener
/// never prevents the others from running.
///
/// # Examples
///
/// ```rust
/// use confcenter::core::Document;
/// use confcenter::notify::ChangeListener;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let doc = Document::new("app.ini");
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// let listener: Arc<dyn ChangeListener> = Arc::new(move |_: &Document| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// doc.add_listener(Arc::clone(&listener), true);
/// doc.notify_listeners();
/// assert_eq!(seen.load(Ordering::SeqCst), 2);
/// ```
pub struct ChangeNotifier {
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
    dispatch: ReentrantMutex<()>,
}

impl ChangeNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            dispatch: ReentrantMutex::new(()),
        }
    }

    /// Register `listener`; when `fire_immediately` is set it is invoked once with `doc`
    /// before this returns. Already-registered listeners are left untouched.
    pub fn register(
        &self,
        doc: &Document,
        listener: Arc<dyn ChangeListener>,
        fire_immediately: bool,
    ) {
        {
            let mut listeners = self.listeners.write();
            if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                return;
            }
            listeners.push(Arc::clone(&listener));
        }
        if fire_immediately {
            let _dispatch = self.dispatch.lock();
            invoke(doc, &listener);
        }
    }

    /// Remove `listener`. Returns whether it was registered.
    pub fn unregister(&self, listener: &Arc<dyn ChangeListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Invoke every registered listener with `doc`.
    ///
    /// Listeners are called in registration order against a snapshot taken when the
    /// broadcast starts.
    pub fn broadcast(&self, doc: &Document) {
        let _dispatch = self.dispatch.lock();
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            tracing::debug!(name = %doc.name(), "changed, notify listener");
            invoke(doc, listener);
        }
    }

    /// Get the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

fn invoke(doc: &Document, listener: &Arc<dyn ChangeListener>) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.changed(doc))) {
        tracing::error!(
            name = %doc.name(),
            reason = %panic_message(panic.as_ref()),
            "change listener failed"
        );
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failing(_: &Document) {
        panic!("listener failure")
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Arc<dyn ChangeListener> {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &Document| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_register_fires_immediately() {
        let doc = Document::new("test");
        let counter = Arc::new(AtomicUsize::new(0));

        doc.add_listener(counting(&counter), true);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_without_fire() {
        let doc = Document::new("test");
        let counter = Arc::new(AtomicUsize::new(0));

        doc.add_listener(counting(&counter), false);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        doc.notify_listeners();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_register_is_noop() {
        let doc = Document::new("test");
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting(&counter);

        doc.add_listener(Arc::clone(&listener), false);
        doc.add_listener(Arc::clone(&listener), true);
        assert_eq!(doc.listener_count(), 1);
        // the duplicate registration does not fire either
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        doc.notify_listeners();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let doc = Document::new("test");
        let counter = Arc::new(AtomicUsize::new(0));

        doc.add_listener(Arc::new(failing), false);
        doc.add_listener(counting(&counter), false);

        doc.notify_listeners();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_on_immediate_fire_keeps_registration() {
        let doc = Document::new("test");
        doc.add_listener(Arc::new(failing), true);
        assert_eq!(doc.listener_count(), 1);
    }

    #[test]
    fn test_unregister() {
        let doc = Document::new("test");
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting(&counter);

        doc.add_listener(Arc::clone(&listener), false);
        assert!(doc.remove_listener(&listener));
        assert!(!doc.remove_listener(&listener));

        doc.notify_listeners();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_handle_unsubscribes_on_drop() {
        let doc = Arc::new(Document::new("test"));
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&counter);

        let handle = doc.subscribe(
            move |_: &Document| {
                inner.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );
        doc.notify_listeners();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        drop(handle);
        doc.notify_listeners();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(doc.listener_count(), 0);
    }

    #[test]
    fn test_listener_sees_current_content() {
        let doc = Document::new("test");
        doc.replace(b"a=1".to_vec());
        let seen = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&seen);
        doc.add_listener(
            Arc::new(move |d: &Document| {
                inner.store(d.get_int("a", 0) as usize, Ordering::SeqCst);
            }),
            true,
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
