//! Local file content source.

use super::{ContentSource, ContentTarget};
use crate::core::Content;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "file-watch")]
use crate::notify::{FileListener, LocalFileWatcher};

/// Document source reading a plain local file.
///
/// A missing file is empty content. With a [`LocalFileWatcher`] attached, later edits
/// (including deletion) are offered to the document.
///
/// # Examples
///
/// ```rust,no_run
/// use confcenter::core::Document;
/// use confcenter::sources::LocalFileSource;
/// use std::sync::Arc;
///
/// let doc = Document::from_source("app.ini", Arc::new(LocalFileSource::new("config/app.ini")));
/// let port = doc.get_int("server.port", 8080);
/// ```
pub struct LocalFileSource {
    path: PathBuf,
    #[cfg(feature = "file-watch")]
    watcher: Option<Arc<LocalFileWatcher>>,
}

impl LocalFileSource {
    /// Create a source for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            #[cfg(feature = "file-watch")]
            watcher: None,
        }
    }

    /// Follow changes of the file through `watcher`.
    #[cfg(feature = "file-watch")]
    pub fn with_watcher(mut self, watcher: Arc<LocalFileWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// The file this source reads.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentSource for LocalFileSource {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn resolve_initial(&self) -> Content {
        Content::from_bytes(read_or_empty(&self.path))
    }

    #[cfg(feature = "file-watch")]
    fn start(self: Arc<Self>, target: ContentTarget) {
        let Some(watcher) = &self.watcher else {
            return;
        };
        let listener: Arc<dyn FileListener> = Arc::new(move |_: &Path, bytes: &[u8]| {
            target.offer(bytes.to_vec());
        });
        if let Err(e) = watcher.watch(&self.path, listener) {
            tracing::warn!(path = %self.path.display(), error = %e, "file will not be watched");
        }
    }

    #[cfg(not(feature = "file-watch"))]
    fn start(self: Arc<Self>, _target: ContentTarget) {}
}

/// Read `path`; absence and read failures yield empty bytes (failures are logged).
pub(crate) fn read_or_empty(path: &Path) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "file absent, using empty content");
            Vec::new()
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to read file, using empty content");
            Vec::new()
        }
    }
}
