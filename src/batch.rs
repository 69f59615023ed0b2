//! Batch-wait admission: once a batch of `max_admitted` tasks has been admitted,
//! the next dispatch waits for the whole batch, replaces the executor with a fresh
//! one of the same size, and only then admits.

use super::{
    errors::PoolError,
    pool::{PoolConfig, PoolCore, WorkerPool},
    tracker::{CompletionGuard, SignalPolicy},
};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Admitting into the current batch.
    Accepting,
    /// Waiting for the current batch before starting the next one.
    Draining,
    /// Nothing in flight.
    Idle,
}

#[derive(Debug)]
pub struct BatchWaitPool {
    core: PoolCore,
    draining: AtomicBool,
    /// Serializes the check, drain and reserve steps of concurrent dispatchers.
    admission: Mutex<()>,
}

impl BatchWaitPool {
    /// Must be called inside a tokio runtime.
    pub fn new(concurrency: usize, max_admitted: Option<usize>) -> Result<Arc<Self>, PoolError> {
        Self::with_config(PoolConfig {
            concurrency,
            max_admitted,
            ..PoolConfig::default()
        })
    }

    pub fn with_config(config: PoolConfig) -> Result<Arc<Self>, PoolError> {
        Ok(Arc::new(Self {
            core: PoolCore::new(config, SignalPolicy::WholeBatch)?,
            draining: AtomicBool::new(false),
            admission: Mutex::new(()),
        }))
    }

    pub fn state(&self) -> BatchState {
        if self.draining.load(Ordering::Acquire) {
            BatchState::Draining
        } else if self.core.tracker().in_flight() == 0 {
            BatchState::Idle
        } else {
            BatchState::Accepting
        }
    }

    /// Admissions in the current batch.
    pub fn batch_len(&self) -> usize {
        self.core.tracker().batch()
    }

    async fn drain(&self) -> Result<(), PoolError> {
        let tracker = self.core.tracker();
        self.draining.store(true, Ordering::Release);
        debug!(
            pool = %self.core.config().name,
            batch = tracker.batch(),
            in_flight = tracker.in_flight(),
            "Batch limit reached, draining"
        );

        let previous = self.core.executor();
        previous.shutdown(false);
        previous.join().await;
        tracker.wait_idle().await;

        let replaced = self.core.replace_executor();
        if replaced.is_ok() {
            tracker.reset_batch();
        }
        self.draining.store(false, Ordering::Release);
        replaced.map(drop)
    }
}

#[async_trait]
impl WorkerPool for BatchWaitPool {
    fn core(&self) -> &PoolCore {
        &self.core
    }

    async fn admit(&self) -> Result<CompletionGuard, PoolError> {
        let _admission = self.admission.lock().await;
        let tracker = self.core.tracker();
        if tracker.is_closed() {
            return Err(PoolError::Closed);
        }
        // Reaching the limit exactly drains before this admission, never after.
        // A closing executor means an earlier drain was interrupted; finish it.
        if tracker.batch() >= self.core.config().max_admitted() || self.core.executor().is_closing()
        {
            self.drain().await?;
        }
        tracker.reserve()
    }
}
