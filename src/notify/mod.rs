//! Change notification.
//!
//! [`ChangeNotifier`] fans a document change out to its listeners. With the `file-watch`
//! feature, [`LocalFileWatcher`] turns edits of local files into content offers.

pub mod notifier;

#[cfg(feature = "file-watch")]
pub mod watcher;

pub use notifier::{ChangeListener, ChangeNotifier, SubscriptionHandle};

#[cfg(feature = "file-watch")]
pub use watcher::{FileListener, LocalFileWatcher};
