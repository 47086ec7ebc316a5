//! Correlation Table - matches validator replies to waiting callers.
//!
//! Flow:
//! 1. Caller picks a fresh `CorrelationId` and calls `register()` for a [`Waiter`]
//! 2. Caller sends the request envelope with that id
//! 3. The dispatch loop receives the reply and calls `resolve()`
//! 4. Caller awaits [`Waiter::wait`], bounded by a timeout
//!
//! Every id is settled exactly once: by a reply, a cancellation or an expiry.
//! Settled ids are remembered in a bounded LRU so a late duplicate reply is
//! reported as `AlreadySettled` instead of `UnknownCorrelation`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use quantum_telemetry::TP_PENDING_CORRELATIONS;
use shared_types::{CorrelationId, MessageKind, RequestEnvelope};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::domain::{CorrelationError, WaitError};

/// How many settled ids are remembered for duplicate detection.
pub const SETTLED_CAPACITY: usize = 4096;

type Resolution = Result<RequestEnvelope, WaitError>;

struct PendingEntry {
    sender: oneshot::Sender<Resolution>,
    expected: MessageKind,
    created_at: Instant,
}

/// Counters for the table's lifetime.
#[derive(Debug, Default)]
pub struct CorrelationStats {
    pub registered: AtomicU64,
    pub resolved: AtomicU64,
    pub cancelled: AtomicU64,
    pub expired: AtomicU64,
    pub anomalies: AtomicU64,
}

struct TableInner {
    pending: DashMap<CorrelationId, PendingEntry>,
    /// Recently settled ids. Lock order: `settled` before any `pending` shard.
    settled: Mutex<LruCache<CorrelationId, ()>>,
    closed: Mutex<Option<WaitError>>,
    stats: CorrelationStats,
}

/// Table of outstanding correlated requests for one connection.
///
/// Cheap to clone; clones share the table.
#[derive(Clone)]
pub struct CorrelationTable {
    inner: Arc<TableInner>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::with_settled_capacity(SETTLED_CAPACITY)
    }

    pub fn with_settled_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(TableInner {
                pending: DashMap::new(),
                settled: Mutex::new(LruCache::new(capacity)),
                closed: Mutex::new(None),
                stats: CorrelationStats::default(),
            }),
        }
    }

    /// Register `id` as outstanding, expecting a reply of kind `expected`.
    ///
    /// # Errors
    ///
    /// - `DuplicateCorrelation` if `id` is already outstanding
    /// - `Closed` once the table has been closed
    pub fn register(
        &self,
        id: CorrelationId,
        expected: MessageKind,
    ) -> Result<Waiter, CorrelationError> {
        let closed = self.inner.closed.lock();
        if let Some(reason) = *closed {
            return Err(CorrelationError::Closed(reason));
        }

        let (tx, rx) = oneshot::channel();
        match self.inner.pending.entry(id) {
            Entry::Occupied(_) => return Err(CorrelationError::DuplicateCorrelation(id)),
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    sender: tx,
                    expected,
                    created_at: Instant::now(),
                });
            }
        }
        drop(closed);

        self.inner.stats.registered.fetch_add(1, Ordering::Relaxed);
        TP_PENDING_CORRELATIONS.inc();
        debug!(correlation_id = %id, expected = ?expected, "Registered correlation");

        Ok(Waiter {
            id,
            rx: Some(rx),
            table: self.clone(),
        })
    }

    /// Deliver `envelope` to the waiter registered under `id`.
    ///
    /// # Errors
    ///
    /// `UnknownCorrelation` or `AlreadySettled`. Both are non-fatal protocol
    /// anomalies; the caller decides how to report them.
    pub fn resolve(
        &self,
        id: CorrelationId,
        envelope: RequestEnvelope,
    ) -> Result<(), CorrelationError> {
        let Some(entry) = self.settle(id) else {
            return Err(self.anomaly(id));
        };

        if entry.expected != envelope.message_kind {
            warn!(
                correlation_id = %id,
                expected = ?entry.expected,
                actual = ?envelope.message_kind,
                "Reply kind does not match request"
            );
        }

        self.inner.stats.resolved.fetch_add(1, Ordering::Relaxed);
        debug!(
            correlation_id = %id,
            elapsed_ms = entry.created_at.elapsed().as_millis(),
            "Resolved correlation"
        );
        // The waiter may have been dropped; the id is settled either way.
        let _ = entry.sender.send(Ok(envelope));
        Ok(())
    }

    /// Resolve the waiter for `id` with `reason`. Returns whether it was
    /// outstanding.
    pub fn cancel(&self, id: CorrelationId, reason: WaitError) -> bool {
        match self.settle(id) {
            Some(entry) => {
                self.inner.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                let _ = entry.sender.send(Err(reason));
                true
            }
            None => false,
        }
    }

    /// Cancel every outstanding waiter. Returns how many were cancelled.
    pub fn cancel_all(&self, reason: WaitError) -> usize {
        let ids: Vec<CorrelationId> = self.inner.pending.iter().map(|e| *e.key()).collect();
        let cancelled = ids
            .into_iter()
            .filter(|id| self.cancel(*id, reason))
            .count();
        if cancelled > 0 {
            debug!(cancelled, reason = %reason, "Cancelled outstanding correlations");
        }
        cancelled
    }

    /// Refuse further registrations and cancel everything outstanding.
    pub fn close(&self, reason: WaitError) -> usize {
        {
            let mut closed = self.inner.closed.lock();
            if closed.is_none() {
                *closed = Some(reason);
            }
        }
        self.cancel_all(reason)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.lock().is_some()
    }

    /// Retire `id` after its waiter gave up. Returns whether it was
    /// outstanding.
    pub fn expire(&self, id: CorrelationId) -> bool {
        match self.settle(id) {
            Some(_) => {
                self.inner.stats.expired.fetch_add(1, Ordering::Relaxed);
                debug!(correlation_id = %id, "Expired correlation");
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.inner.pending.contains_key(id)
    }

    pub fn stats(&self) -> &CorrelationStats {
        &self.inner.stats
    }

    /// Remove `id` from the pending set and remember it as settled.
    fn settle(&self, id: CorrelationId) -> Option<PendingEntry> {
        let mut settled = self.inner.settled.lock();
        let (_, entry) = self.inner.pending.remove(&id)?;
        settled.put(id, ());
        TP_PENDING_CORRELATIONS.dec();
        Some(entry)
    }

    fn anomaly(&self, id: CorrelationId) -> CorrelationError {
        self.inner.stats.anomalies.fetch_add(1, Ordering::Relaxed);
        if self.inner.settled.lock().contains(&id) {
            CorrelationError::AlreadySettled(id)
        } else {
            CorrelationError::UnknownCorrelation(id)
        }
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one outstanding request. Dropping it without waiting retires
/// the id.
pub struct Waiter {
    id: CorrelationId,
    rx: Option<oneshot::Receiver<Resolution>>,
    table: CorrelationTable,
}

impl Waiter {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Suspend until the reply arrives, the request is cancelled, or
    /// `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> Result<RequestEnvelope, WaitError> {
        let Some(rx) = self.rx.take() else {
            return Err(WaitError::ChannelLost);
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resolution)) => resolution,
            // Sender dropped without settling: the table itself is gone.
            Ok(Err(_)) => Err(WaitError::ChannelLost),
            Err(_) => {
                if self.table.expire(self.id) {
                    warn!(
                        correlation_id = %self.id,
                        timeout_ms = timeout.as_millis(),
                        "Timed out waiting for reply"
                    );
                }
                Err(WaitError::Timeout)
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.table.expire(self.id);
        }
    }
}
