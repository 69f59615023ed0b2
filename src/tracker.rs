//! Completion bookkeeping shared by every pool variant.
//!
//! All admission state lives behind one lock: the in-flight count, the batch
//! count, the closed flag and the set of outstanding handles. Metrics counters are
//! plain atomics and are never read to make admission decisions.

use super::{
    errors::{PoolError, TaskError},
    gate::{AdmissionGate, Wake},
    handle::{StatusCell, TaskId, TaskStatus},
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, error};

/// How a completion wakes blocked dispatchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPolicy {
    /// Every completion frees exactly one slot and wakes one dispatcher.
    EachCompletion,
    /// Only an empty pool matters to dispatchers.
    WholeBatch,
}

#[derive(Debug, Default)]
struct TrackerState {
    in_flight: usize,
    /// Admissions since the last drain.
    batch: usize,
    closed: bool,
    outstanding: HashMap<TaskId, Arc<StatusCell>>,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    batches: AtomicUsize,
}

pub struct CompletionTracker {
    state: Mutex<TrackerState>,
    gate: AdmissionGate,
    policy: SignalPolicy,
    next_id: AtomicU64,
    counters: Counters,
}

/// Snapshot of the tracked state, taken under the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub in_flight: usize,
    pub outstanding: usize,
    pub batch: usize,
    pub closed: bool,
}

impl CompletionTracker {
    pub fn new(policy: SignalPolicy) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TrackerState::default()),
            gate: AdmissionGate::new(),
            policy,
            next_id: AtomicU64::new(0),
            counters: Counters::default(),
        })
    }

    #[inline]
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.state.lock();
        TrackerSnapshot {
            in_flight: state.in_flight,
            outstanding: state.outstanding.len(),
            batch: state.batch,
            closed: state.closed,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// True iff any outstanding task has been picked up by a worker and not finished.
    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .outstanding
            .values()
            .any(|s| s.get() == TaskStatus::Running)
    }

    /// Admissions since the last [`reset_batch`](Self::reset_batch).
    pub fn batch(&self) -> usize {
        self.state.lock().batch
    }

    /// Marks the tracker closed. Returns `false` if it already was.
    pub(crate) fn close(&self) -> bool {
        let first = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        // Blocked dispatchers re-check and observe the closed flag.
        self.gate.wake_all();
        first
    }

    /// Reserves a slot if fewer than `limit` tasks are in flight.
    ///
    /// `None` means the pool is saturated; `Some(Err(_))` means it is closed.
    pub(crate) fn try_reserve(
        self: &Arc<Self>,
        limit: usize,
    ) -> Option<Result<CompletionGuard, PoolError>> {
        let mut state = self.state.lock();
        if state.closed {
            return Some(Err(PoolError::Closed));
        }
        if state.in_flight >= limit {
            return None;
        }
        Some(Ok(self.register(&mut state)))
    }

    /// Reserves a slot regardless of the in-flight count.
    pub(crate) fn reserve(self: &Arc<Self>) -> Result<CompletionGuard, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        Ok(self.register(&mut state))
    }

    fn register(self: &Arc<Self>, state: &mut TrackerState) -> CompletionGuard {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let status = Arc::new(StatusCell::default());
        state.in_flight += 1;
        state.batch += 1;
        state.outstanding.insert(id, status.clone());
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        CompletionGuard {
            tracker: self.clone(),
            id,
            name: Arc::from(""),
            status,
            outcome: None,
        }
    }

    /// Starts a new batch. Only meaningful once the previous batch drained.
    pub(crate) fn reset_batch(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.in_flight, 0, "batch reset with tasks in flight");
        state.batch = 0;
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Waits until no task is in flight.
    pub async fn wait_idle(&self) {
        self.gate
            .wait_for(Wake::Drained, || (self.state.lock().in_flight == 0).then_some(()))
            .await
    }

    fn finish(&self, id: TaskId, status: TaskStatus) {
        let remaining = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.outstanding.remove(&id);
            state.in_flight
        };

        let counter = match status {
            TaskStatus::Succeeded => &self.counters.succeeded,
            TaskStatus::Failed => &self.counters.failed,
            _ => &self.counters.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if self.policy == SignalPolicy::EachCompletion {
            self.gate.signal_slot();
        }
        if remaining == 0 {
            self.gate.signal_drained();
        }
    }

    pub fn dispatched(&self) -> usize {
        self.counters.dispatched.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> usize {
        self.counters.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.counters.failed.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> usize {
        self.counters.cancelled.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> usize {
        self.counters.batches.load(Ordering::Relaxed)
    }
}

/// One reserved slot.
///
/// The completion step runs in `Drop`, so the slot is released whether the task
/// finished, failed, panicked, or was discarded before it ever ran.
pub struct CompletionGuard {
    tracker: Arc<CompletionTracker>,
    id: TaskId,
    name: Arc<str>,
    status: Arc<StatusCell>,
    outcome: Option<TaskStatus>,
}

impl CompletionGuard {
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn status(&self) -> &Arc<StatusCell> {
        &self.status
    }

    pub fn set_name(&mut self, name: Arc<str>) {
        self.name = name;
    }

    pub fn started(&self) {
        self.status.set(TaskStatus::Running);
    }

    /// Records the outcome, logging failures. Bookkeeping happens when the guard drops.
    pub fn record<T>(&mut self, result: &Result<T, TaskError>) {
        let status = match result {
            Ok(_) => TaskStatus::Succeeded,
            Err(TaskError::Cancelled) => TaskStatus::Cancelled,
            Err(e) => {
                error!(task = %self.name, task_id = %self.id, error = %e, "Task failed");
                TaskStatus::Failed
            }
        };
        self.outcome = Some(status);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let status = self.outcome.unwrap_or(TaskStatus::Cancelled);
        if self.outcome.is_none() {
            debug!(task = %self.name, task_id = %self.id, "Task discarded before completion");
        }
        self.status.set(status);
        self.tracker.finish(self.id, status);
    }
}
