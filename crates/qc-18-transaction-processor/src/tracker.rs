//! In-flight execution tracking for graceful drain.

use parking_lot::Mutex;
use quantum_telemetry::TP_IN_FLIGHT;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::AbortHandle;

struct TrackerInner {
    count: watch::Sender<usize>,
    handles: Mutex<HashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
}

/// Spawns executions and counts the ones still running.
#[derive(Clone)]
pub struct ExecutionTracker {
    inner: Arc<TrackerInner>,
}

/// Removes a finished (or aborted) task from the tracker.
struct TaskGuard {
    id: u64,
    inner: Arc<TrackerInner>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.inner.handles.lock().remove(&self.id);
        self.inner.count.send_modify(|n| *n = n.saturating_sub(1));
        TP_IN_FLIGHT.dec();
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            inner: Arc::new(TrackerInner {
                count,
                handles: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn `fut` as a tracked execution.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.count.send_modify(|n| *n += 1);
        TP_IN_FLIGHT.inc();

        let guard = TaskGuard {
            id,
            inner: self.inner.clone(),
        };

        // Held across spawn so the guard cannot remove the id before it is
        // inserted.
        let mut handles = self.inner.handles.lock();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
        handles.insert(id, handle.abort_handle());
    }

    pub fn in_flight(&self) -> usize {
        *self.inner.count.borrow()
    }

    /// Wait until no execution is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.count.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Abort every running execution. Returns how many were signalled.
    pub fn abort_all(&self) -> usize {
        let handles: Vec<AbortHandle> = self.inner.handles.lock().values().cloned().collect();
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}
