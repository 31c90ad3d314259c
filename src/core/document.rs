//! The configuration document handle providing lock-free access.

use crate::notify::{ChangeListener, ChangeNotifier, SubscriptionHandle};
use crate::sources::{ContentSource, ContentTarget};
use arc_swap::ArcSwap;
use parking_lot::ReentrantMutex;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Flat `key=value` view of a document.
pub type KvMap = BTreeMap<String, String>;

/// One immutable version of a document's content.
///
/// The bytes never change after construction; the key/value view is parsed lazily, at
/// most once, on the first lookup.
pub struct Content {
    bytes: Vec<u8>,
    parsed: OnceLock<Arc<KvMap>>,
}

impl Content {
    /// Wrap raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            parsed: OnceLock::new(),
        }
    }

    /// Build content from an already-parsed map. The bytes are the map rendered as
    /// `key=value` lines in key order.
    pub fn from_map(map: KvMap) -> Self {
        let mut text = String::new();
        for (key, value) in &map {
            text.push_str(key);
            text.push('=');
            text.push_str(value);
            text.push('\n');
        }
        Self {
            bytes: text.into_bytes(),
            parsed: OnceLock::from(Arc::new(map)),
        }
    }

    /// Empty content.
    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// The raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether there are no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The key/value view, parsed on first access.
    pub fn parsed(&self) -> &Arc<KvMap> {
        self.parsed
            .get_or_init(|| Arc::new(parse_kv(&self.bytes)))
    }

    /// Lines of the content decoded as UTF-8 (lossily).
    pub fn lines(&self, strip_comments: bool) -> Vec<String> {
        split_lines(&String::from_utf8_lossy(&self.bytes), strip_comments)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("len", &self.bytes.len())
            .field("parsed", &self.parsed.get().is_some())
            .finish()
    }
}

/// Split text into trimmed, non-empty lines, optionally dropping `#` and `//` comments.
pub fn split_lines(text: &str, strip_comments: bool) -> Vec<String> {
    text.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !strip_comments || !(line.starts_with('#') || line.starts_with("//")))
        .map(str::to_string)
        .collect()
}

/// Parse flat `key=value` text.
///
/// A line counts only if it has an `=` followed by at least one character and a
/// non-empty key. Keys and values are trimmed; later duplicates win; comment lines and
/// malformed lines are skipped.
pub fn parse_kv(bytes: &[u8]) -> KvMap {
    let mut map = KvMap::new();
    for line in split_lines(&String::from_utf8_lossy(bytes), true) {
        let Some(pos) = line.find('=') else {
            continue;
        };
        if pos + 1 >= line.len() {
            continue;
        }
        let key = line[..pos].trim();
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), line[pos + 1..].trim().to_string());
    }
    map
}

/// A named configuration blob with typed accessors and change notification.
///
/// Content is replaced wholesale and read without locks through `arc-swap`. Where the
/// bytes come from is decided by the [`ContentSource`] the document was built with.
///
/// # Examples
///
/// ```rust
/// use confcenter::core::Document;
///
/// let doc = Document::with_content("app.ini", b"pool.size = 20\nname=orders\n# comment".to_vec());
/// assert_eq!(doc.get_int("pool.size", 1), 20);
/// assert_eq!(doc.get("name").as_deref(), Some("orders"));
/// assert_eq!(doc.get_int("missing", 7), 7);
/// assert_eq!(doc.get_lines(true).len(), 2);
/// ```
pub struct Document {
    name: String,
    content: ArcSwap<Content>,
    notifier: ChangeNotifier,
    update: ReentrantMutex<()>,
    source: OnceLock<Arc<dyn ContentSource>>,
}

impl Document {
    /// Create an empty document that is only changed through [`replace`](Self::replace)
    /// and [`offer`](Self::offer).
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_content(name, Vec::new())
    }

    /// Create a document holding `bytes`.
    pub fn with_content(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content: ArcSwap::from_pointee(Content::from_bytes(bytes)),
            notifier: ChangeNotifier::new(),
            update: ReentrantMutex::new(()),
            source: OnceLock::new(),
        }
    }

    /// Create a document backed by `source`.
    ///
    /// The source's initial content is installed before the source is started, so the
    /// document is readable as soon as this returns.
    pub fn from_source(name: impl Into<String>, source: Arc<dyn ContentSource>) -> Arc<Self> {
        let doc = Arc::new(Self::new(name));
        doc.content.store(Arc::new(source.resolve_initial()));
        let _ = doc.source.set(Arc::clone(&source));
        tracing::debug!(name = %doc.name, source = %source.name(), "document created");
        source.start(ContentTarget::new(&doc));
        doc
    }

    /// The document's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the source feeding this document, if any.
    pub fn source_name(&self) -> Option<String> {
        self.source.get().map(|source| source.name())
    }

    /// Reference-counted handle to the current content version.
    pub fn snapshot(&self) -> Arc<Content> {
        self.content.load_full()
    }

    /// Copy of the current bytes.
    pub fn content(&self) -> Vec<u8> {
        self.content.load().bytes().to_vec()
    }

    /// Atomically swap in new bytes. Listeners are not notified.
    pub fn replace(&self, bytes: Vec<u8>) {
        self.content.store(Arc::new(Content::from_bytes(bytes)));
    }

    /// Whether `bytes` differ from the current content, byte for byte.
    pub fn is_changed(&self, bytes: &[u8]) -> bool {
        self.content.load().bytes() != bytes
    }

    /// Replace the content with `bytes` and notify listeners, unless the bytes are
    /// identical to the current content. Returns whether a change was applied.
    pub fn offer(&self, bytes: Vec<u8>) -> bool {
        let _update = self.update.lock();
        if !self.is_changed(&bytes) {
            return false;
        }
        tracing::info!(name = %self.name, bytes = bytes.len(), "content changed");
        self.replace(bytes);
        self.notify_listeners();
        true
    }

    /// Install `content` and notify listeners unconditionally.
    pub fn publish(&self, content: Content) {
        let _update = self.update.lock();
        self.content.store(Arc::new(content));
        self.notify_listeners();
    }

    /// Invoke every registered listener.
    pub fn notify_listeners(&self) {
        self.notifier.broadcast(self);
    }

    /// Register a listener. With `fire_immediately` it is invoked once before this
    /// returns, so it can load the current state.
    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>, fire_immediately: bool) {
        self.notifier.register(self, listener, fire_immediately);
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ChangeListener>) -> bool {
        self.notifier.unregister(listener)
    }

    /// Register `callback` and get a handle that unregisters it when dropped.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F, fire_immediately: bool) -> SubscriptionHandle
    where
        F: Fn(&Document) + Send + Sync + 'static,
    {
        let listener: Arc<dyn ChangeListener> = Arc::new(callback);
        self.add_listener(Arc::clone(&listener), fire_immediately);
        SubscriptionHandle::new(listener, Arc::downgrade(self))
    }

    /// Get the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.notifier.listener_count()
    }

    /// Look up `key` in the key/value view.
    pub fn get(&self, key: &str) -> Option<String> {
        self.content.load().parsed().get(key).cloned()
    }

    /// Look up `key`, falling back to `default`.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.content.load().parsed().contains_key(key)
    }

    /// The whole key/value view.
    pub fn all(&self) -> Arc<KvMap> {
        Arc::clone(self.content.load().parsed())
    }

    /// `key` as `i32`, or `default` when missing, empty or unparsable.
    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        self.parse_value(key).unwrap_or(default)
    }

    /// `key` as `i64`, or `default` when missing, empty or unparsable.
    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        self.parse_value(key).unwrap_or(default)
    }

    /// `key` as `f64`, or `default` when missing, empty or unparsable.
    pub fn get_double(&self, key: &str, default: f64) -> f64 {
        self.parse_value(key).unwrap_or(default)
    }

    /// `key` as a boolean (`true`/`false`, any case), or `default` otherwise.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) if v.eq_ignore_ascii_case("true") => true,
            Some(v) if v.eq_ignore_ascii_case("false") => false,
            _ => default,
        }
    }

    /// Content decoded as UTF-8; invalid sequences are replaced.
    pub fn get_string(&self) -> String {
        String::from_utf8_lossy(self.content.load().bytes()).into_owned()
    }

    /// Trimmed, non-empty lines; with `strip_comments`, `#` and `//` lines are dropped.
    pub fn get_lines(&self, strip_comments: bool) -> Vec<String> {
        self.content.load().lines(strip_comments)
    }

    fn parse_value<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse().ok())
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.name)
            .field("content", &self.content.load())
            .field("listeners", &self.listener_count())
            .field("source", &self.source_name())
            .finish()
    }
}
