//! Delayed task execution.

use crate::error::{ConfigError, Result};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};

/// Runs tasks after a delay on a tokio runtime.
///
/// Either owns a small dedicated runtime or borrows the handle of one the application
/// already runs. Tasks are blocking closures; they run on the runtime's blocking pool so
/// they may take locks and touch the filesystem.
pub struct Scheduler {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl Scheduler {
    /// Create a scheduler backed by its own single-worker runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be started.
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("confcenter-scheduler")
            .enable_time()
            .build()
            .map_err(|e| ConfigError::SchedulerError(format!("Failed to start runtime: {}", e)))?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    /// Create a scheduler that spawns onto an existing runtime.
    ///
    /// The runtime must have its time driver enabled.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            runtime: None,
            handle,
        }
    }

    /// Run `task` once `delay` has elapsed.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        tracing::debug!(delay_ms = delay.as_millis() as u64, "scheduling task");
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                tracing::error!(error = %e, "scheduled task failed");
            }
        });
    }

    /// Whether this scheduler owns its runtime.
    pub fn owns_runtime(&self) -> bool {
        self.runtime.is_some()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("owns_runtime", &self.owns_runtime())
            .finish()
    }
}
