//! Built-in metrics for synchronization activity.
//!
//! Provides OpenTelemetry counters for:
//! - Resolution passes and failed passes against the coordination store
//! - Documents whose content changed
//! - Cache file writes and discarded empty results
//! - File events delivered to listeners or suppressed by masks
//!
//! # Examples
//!
//! ```rust,no_run
//! use confcenter::prelude::*;
//! use opentelemetry::global;
//!
//! # fn example() -> Result<()> {
//! let registry = ConfigRegistry::builder()
//!     .with_metrics(global::meter("my-app"))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod sync_metrics;

pub use sync_metrics::SyncMetrics;
