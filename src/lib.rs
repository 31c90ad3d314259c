//! # confcenter
//!
//! Configuration center client: named configuration blobs distributed from a
//! coordination store, with a local cache fallback and live change notification.
//!
//! ## Overview
//!
//! `confcenter` keeps every process in sync with centrally managed configuration:
//! - Priority-resolved overrides: the most specific of `ip:port`, `ip`, `profile` and
//!   process `name` that exists under a document's base path wins
//! - Watch-driven updates that survive reconnects and session loss
//! - A local cache file served at startup, guarded against being wiped by an empty store
//! - Lock-free reads using `arc-swap`, with typed accessors over flat `key=value` text
//! - Change listeners, and merged views over several documents
//!
//! ## Quick Start
//!
//! ```rust
//! use confcenter::prelude::*;
//! use confcenter::store::{publish, MemoryStore};
//! use std::sync::Arc;
//!
//! # fn main() -> confcenter::error::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! publish(store.as_ref(), "/cms/config/db.ini", "production", b"pool.size=20")?;
//!
//! let registry = ConfigRegistry::builder()
//!     .with_identity(ProcessIdentity::named("orders").with_profile("production"))
//!     .with_store(store.clone())
//!     .build()?;
//!
//! let db = registry.get_config("db.ini");
//! assert_eq!(db.get_int("pool.size", 10), 20);
//!
//! // Listeners see every change
//! db.add_listener(
//!     Arc::new(|doc: &Document| println!("pool size now {}", doc.get_int("pool.size", 10))),
//!     false,
//! );
//! publish(store.as_ref(), "/cms/config/db.ini", "production", b"pool.size=40")?;
//! assert_eq!(db.get_int("pool.size", 10), 40);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `file-watch` (default): follow local documents and cache files with a file watcher
//! - `metrics`: OpenTelemetry counters for synchronization activity
//!
//! ```toml
//! [dependencies]
//! confcenter = { version = "0.1", features = ["metrics"] }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod notify;
pub mod sources;
pub mod store;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{
        ConfigRegistry, DeploymentMode, Document, ProcessIdentity, RegistryBuilder, Settings,
    };
    pub use crate::error::{ConfigError, Result};
    pub use crate::notify::{ChangeListener, SubscriptionHandle};
    pub use crate::store::CoordinationStore;
}
