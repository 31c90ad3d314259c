//! Content source implementations.
//!
//! Every [`Document`](crate::core::Document) is fed by one [`ContentSource`]:
//! - [`LocalFileSource`] reads a plain local file
//! - [`RemoteSource`] follows the coordination store through a [`RemoteSyncEngine`]
//! - [`LocalCacheOverlay`] does the same with a local cache file in front
//! - [`MergedConfigView`](crate::core::MergedConfigView) combines other documents

mod cached;
mod content_source;
mod file;
mod remote;

pub use cached::LocalCacheOverlay;
pub use content_source::{ContentSource, ContentTarget};
pub use file::LocalFileSource;
pub use remote::{EngineEvent, Phase, RemoteSource, RemoteSyncEngine, ResolvedHandler};
