//! Priority admission queue.
//!
//! [`AdmissionQueue`] bounds how many operations run at once. Callers that
//! cannot be admitted wait in a heap ordered by `(priority, arrival)`, so a
//! higher priority always goes first and equal priorities keep arrival order.
//!
//! Admission is represented by an [`AdmissionPermit`]. Dropping the permit
//! releases it, which hands it directly to the best waiter when there is one.
//! Because release happens in `Drop`, a task that fails or is cancelled still
//! gives its slot back.
//!
//! The limit belongs to the queue, not to a call: [`AdmissionQueue::set_limit`]
//! changes it for every later admission, and raising it admits waiters
//! immediately.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::metrics::record_queue_active;
use crate::options::Priority;

struct Waiter {
    weight: u8,
    seq: u64,
    tx: oneshot::Sender<AdmissionPermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: higher weight first, then lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .cmp(&other.weight)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    active: usize,
    limit: usize,
    seq: u64,
    waiters: BinaryHeap<Waiter>,
}

struct QueueInner {
    state: Mutex<QueueState>,
}

/// Shared bounded-concurrency gate. Cloning shares the queue.
#[derive(Clone)]
pub struct AdmissionQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for AdmissionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("AdmissionQueue")
            .field("active", &state.active)
            .field("limit", &state.limit)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

impl AdmissionQueue {
    /// Creates a queue admitting `limit` operations at once (at least one).
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    active: 0,
                    limit: limit.max(1),
                    seq: 0,
                    waiters: BinaryHeap::new(),
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of permits currently held.
    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Current limit.
    pub fn limit(&self) -> usize {
        self.lock().limit
    }

    /// Number of queued waiters, including ones that gave up but were not yet skipped.
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Changes the limit for every later admission.
    pub fn set_limit(&self, limit: usize) {
        let mut state = self.lock();
        let limit = limit.max(1);
        if state.limit != limit {
            debug!(from = state.limit, to = limit, "admission limit changed");
            state.limit = limit;
        }
        while state.active < state.limit {
            let Some(waiter) = state.waiters.pop() else {
                break;
            };
            if self.grant(waiter) {
                state.active += 1;
            }
        }
        record_queue_active(state.active);
    }

    /// Waits for admission at `priority`.
    pub async fn acquire(&self, priority: Priority) -> AdmissionPermit {
        loop {
            let rx = {
                let mut state = self.lock();
                if state.active < state.limit {
                    state.active += 1;
                    record_queue_active(state.active);
                    return AdmissionPermit::new(self.clone());
                }
                let (tx, rx) = oneshot::channel();
                state.seq += 1;
                let seq = state.seq;
                trace!(?priority, seq, "waiting for admission");
                state.waiters.push(Waiter {
                    weight: priority.weight(),
                    seq,
                    tx,
                });
                rx
            };
            if let Ok(permit) = rx.await {
                return permit;
            }
        }
    }

    /// Runs `task` once admitted, releasing the permit however it ends.
    ///
    /// When `limit` is given it replaces the queue's limit first.
    pub async fn execute<F>(&self, priority: Priority, limit: Option<usize>, task: F) -> F::Output
    where
        F: Future,
    {
        if let Some(limit) = limit {
            self.set_limit(limit);
        }
        let _permit = self.acquire(priority).await;
        task.await
    }

    // Hands a fresh permit to `waiter`. A waiter that gave up returns it,
    // in which case the permit is defused so it does not release again.
    fn grant(&self, waiter: Waiter) -> bool {
        match waiter.tx.send(AdmissionPermit::new(self.clone())) {
            Ok(()) => true,
            Err(mut permit) => {
                permit.queue = None;
                false
            }
        }
    }

    fn release(&self) {
        let mut state = self.lock();
        while state.active <= state.limit {
            let Some(waiter) = state.waiters.pop() else {
                break;
            };
            if self.grant(waiter) {
                return;
            }
        }
        state.active = state.active.saturating_sub(1);
        record_queue_active(state.active);
    }
}

/// Proof of admission. Dropping it releases the slot.
#[must_use = "dropping the permit releases the admission slot"]
pub struct AdmissionPermit {
    queue: Option<AdmissionQueue>,
}

impl AdmissionPermit {
    fn new(queue: AdmissionQueue) -> Self {
        Self { queue: Some(queue) }
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish_non_exhaustive()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.release();
        }
    }
}
