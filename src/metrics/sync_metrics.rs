//! Synchronization metrics tracking using OpenTelemetry.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};

/// Metrics collector for synchronization activity.
///
/// Every counter carries a `name` attribute with the document (or file) it concerns.
///
/// # Examples
///
/// ```rust,no_run
/// use confcenter::metrics::SyncMetrics;
/// use opentelemetry::global;
///
/// let metrics = SyncMetrics::new(global::meter("confcenter"));
/// metrics.record_pass("app.ini");
/// metrics.record_change("app.ini");
/// ```
#[derive(Clone)]
pub struct SyncMetrics {
    resolution_passes: Counter<u64>,
    resolution_failures: Counter<u64>,
    documents_changed: Counter<u64>,
    cache_writes: Counter<u64>,
    guard_discards: Counter<u64>,
    file_events_delivered: Counter<u64>,
    file_events_suppressed: Counter<u64>,
}

impl SyncMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let resolution_passes = meter
            .u64_counter("confcenter.resolution.passes")
            .with_description("Number of resolution passes against the coordination store")
            .build();

        let resolution_failures = meter
            .u64_counter("confcenter.resolution.failures")
            .with_description("Number of resolution passes aborted by a store error")
            .build();

        let documents_changed = meter
            .u64_counter("confcenter.documents.changed")
            .with_description("Number of content changes applied to documents")
            .build();

        let cache_writes = meter
            .u64_counter("confcenter.cache.writes")
            .with_description("Number of cache file writes")
            .build();

        let guard_discards = meter
            .u64_counter("confcenter.cache.guard_discards")
            .with_description("Number of empty results discarded before the first sync")
            .build();

        let file_events_delivered = meter
            .u64_counter("confcenter.file_events.delivered")
            .with_description("Number of file changes delivered to listeners")
            .build();

        let file_events_suppressed = meter
            .u64_counter("confcenter.file_events.suppressed")
            .with_description("Number of file changes suppressed by a mask")
            .build();

        Self {
            resolution_passes,
            resolution_failures,
            documents_changed,
            cache_writes,
            guard_discards,
            file_events_delivered,
            file_events_suppressed,
        }
    }

    /// Record a resolution pass.
    pub fn record_pass(&self, name: &str) {
        self.resolution_passes.add(1, &attrs(name));
    }

    /// Record a resolution pass aborted by a store error.
    pub fn record_failure(&self, name: &str) {
        self.resolution_failures.add(1, &attrs(name));
    }

    /// Record a content change applied to a document.
    pub fn record_change(&self, name: &str) {
        self.documents_changed.add(1, &attrs(name));
    }

    /// Record a cache file write.
    pub fn record_cache_write(&self, name: &str) {
        self.cache_writes.add(1, &attrs(name));
    }

    /// Record an empty result discarded by the cache guard.
    pub fn record_guard_discard(&self, name: &str) {
        self.guard_discards.add(1, &attrs(name));
    }

    /// Record a file change delivered to listeners.
    pub fn record_file_delivered(&self, path: &str) {
        self.file_events_delivered.add(1, &attrs(path));
    }

    /// Record a file change suppressed by a mask.
    pub fn record_file_suppressed(&self, path: &str) {
        self.file_events_suppressed.add(1, &attrs(path));
    }
}

fn attrs(name: &str) -> [KeyValue; 1] {
    [KeyValue::new("name", name.to_string())]
}
