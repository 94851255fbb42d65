//! Supervised registry for background tasks.
//!
//! Work that outlives the request that started it (upload finalization) is
//! spawned here. Each task reports success or failure into shared counters so
//! the outcome stays observable after the HTTP response has been sent, and
//! every handle is awaited during graceful shutdown.

// std::sync::Mutex is correct here: the lock is never held across .await points.
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

// ============================================================================
// BackgroundTasks
// ============================================================================

/// Registry for background tasks that should be awaited on shutdown.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of task outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub pending: usize,
    pub succeeded: u64,
    pub failed: u64,
}

impl BackgroundTasks {
    // ------------------------------------------------------------------------
    // Constructor
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Task Management
    // ------------------------------------------------------------------------

    /// Spawn a fallible task and register its handle.
    ///
    /// The outcome is logged under `name` and counted. Registration happens
    /// before this method returns, so fast-completing tasks are still tracked.
    pub fn spawn<F, E>(&self, name: &'static str, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let counters = Arc::clone(&self.counters);
        let handle = tokio::spawn(async move {
            match future.await {
                Ok(()) => {
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(task = name, error = %e, "Background task failed");
                }
            }
        });

        let mut guard = self.handles.lock().expect("mutex poisoned");
        guard.retain(|h| !h.is_finished());
        guard.push(handle);
    }

    /// Wait for all registered tasks to complete.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock().expect("mutex poisoned"));

        let count = handles.len();
        if count == 0 {
            return;
        }

        info!(count, "Waiting for background tasks to complete");

        for (i, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(task = i, error = %e, "Background task panicked");
            }
        }

        info!("All background tasks completed");
    }

    pub fn pending_count(&self) -> usize {
        let mut guard = self.handles.lock().expect("mutex poisoned");
        guard.retain(|h| !h.is_finished());
        guard.len()
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            pending: self.pending_count(),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_and_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks = BackgroundTasks::new();

        for delay in [10, 20] {
            let c = counter.clone();
            tasks.spawn("test", async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            });
        }

        tasks.shutdown().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(tasks.stats().succeeded, 2);
    }

    #[tokio::test]
    async fn failures_are_counted() {
        let tasks = BackgroundTasks::new();

        tasks.spawn("ok", async { Ok::<(), String>(()) });
        tasks.spawn("bad", async { Err::<(), String>("boom".to_string()) });
        tasks.shutdown().await;

        let stats = tasks.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn shutdown_empty_is_noop() {
        let tasks = BackgroundTasks::new();
        tasks.shutdown().await;
        assert_eq!(tasks.stats().pending, 0);
    }
}
