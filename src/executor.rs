use super::handle::Job;
use crossbeam::deque::{Injector, Steal};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fixed-size execution resource: `size` worker loops sharing one injector queue.
///
/// Each worker runs one job at a time, so at most `size` jobs execute at once.
/// Must be created inside a tokio runtime.
pub struct Executor {
    inject: Injector<Job>,
    job_ready: Notify,
    closing: CancellationToken,
    queued: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    pub fn spawn(size: usize) -> Arc<Self> {
        let executor = Arc::new(Self {
            inject: Injector::new(),
            job_ready: Notify::new(),
            closing: CancellationToken::new(),
            queued: AtomicUsize::new(0),
            workers: Mutex::new(Vec::with_capacity(size)),
        });

        let handles = (0..size)
            .map(|index| {
                let executor = executor.clone();
                tokio::spawn(async move { executor.worker_loop(index).await })
            })
            .collect();
        *executor.workers.lock() = handles;

        executor
    }

    /// Jobs submitted but not yet picked up by a worker.
    #[inline]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    pub fn push(&self, job: Job) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        self.inject.push(job);
        self.job_ready.notify_one();
    }

    fn next_job(&self) -> Option<Job> {
        loop {
            match self.inject.steal() {
                Steal::Success(job) => {
                    self.queued.fetch_sub(1, Ordering::Relaxed);
                    return Some(job);
                }
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    async fn worker_loop(&self, index: usize) {
        loop {
            if let Some(job) = self.next_job() {
                job.await;
                continue;
            }

            let notified = self.job_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.inject.is_empty() {
                continue;
            }
            // Queued work still runs after shutdown starts; an empty queue ends the loop.
            if self.closing.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = notified => {}
                _ = self.closing.cancelled() => {}
            }
        }
        debug!(worker = index, "Worker exited");
    }

    /// Stops accepting work. Workers finish the queue and exit, unless
    /// `cancel_pending` discards what has not started yet.
    ///
    /// Returns the number of discarded jobs.
    pub fn shutdown(&self, cancel_pending: bool) -> usize {
        self.closing.cancel();
        if !cancel_pending {
            return 0;
        }
        let mut discarded = 0;
        // Dropping a job runs its completion guard, which records it as cancelled.
        while let Some(job) = self.next_job() {
            drop(job);
            discarded += 1;
        }
        discarded
    }

    /// Waits for every worker loop to exit. Only meaningful after [`shutdown`](Self::shutdown).
    pub async fn join(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "Worker terminated abnormally");
            }
        }
    }
}
