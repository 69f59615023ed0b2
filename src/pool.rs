use super::{
    collector::ResultCollector,
    errors::{panic_message, PoolError, TaskError, TaskOutcome},
    executor::Executor,
    handle::{Job, TaskResult},
    model::{Collection, PoolMetrics},
    tracker::{CompletionGuard, CompletionTracker, SignalPolicy},
};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::{
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
};
use tokio::{sync::oneshot, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers, i.e. tasks that can execute at the same time.
    pub concurrency: usize,
    /// Admission limit; defaults to `concurrency`. A larger value lets admitted
    /// tasks queue for a free worker.
    pub max_admitted: Option<usize>,
    /// Used in log fields only.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get() * 2, // tasks are usually I/O-bound
            max_admitted: None,
            name: "pool".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    pub fn cpu_bound() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn io_bound() -> Self {
        Self::new(num_cpus::get() * 2)
    }

    /// Reads `POOL_CONCURRENCY`, `POOL_MAX_ADMITTED` and `POOL_NAME`, falling back to
    /// [`Default`] for unset variables.
    pub fn from_env() -> Result<Self, PoolError> {
        let mut config = Self::default();
        if let Some(n) = env_usize("POOL_CONCURRENCY")? {
            config.concurrency = n;
        }
        config.max_admitted = env_usize("POOL_MAX_ADMITTED")?;
        if let Ok(name) = std::env::var("POOL_NAME") {
            config.name = name;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_admitted(mut self, max: usize) -> Self {
        self.max_admitted = Some(max);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[inline]
    pub fn max_admitted(&self) -> usize {
        self.max_admitted.unwrap_or(self.concurrency)
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.concurrency == 0 {
            return Err(PoolError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.max_admitted == Some(0) {
            return Err(PoolError::InvalidConfig(
                "max_admitted must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Result<Option<usize>, PoolError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PoolError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Name logged for a task when none is given: the callable's type path.
pub(crate) fn task_name<F>() -> Arc<str> {
    Arc::from(std::any::type_name::<F>())
}

/// State and plumbing shared by every pool variant.
///
/// Owns the completion tracker (the monitor) and the current execution resource.
/// Dropping it closes the tracker and discards queued work without waiting.
pub struct PoolCore {
    config: PoolConfig,
    tracker: Arc<CompletionTracker>,
    executor: Mutex<Arc<Executor>>,
}

impl PoolCore {
    /// Must be called inside a tokio runtime.
    pub fn new(config: PoolConfig, policy: SignalPolicy) -> Result<Self, PoolError> {
        config.validate()?;
        info!(
            pool = %config.name,
            concurrency = config.concurrency,
            max_admitted = config.max_admitted(),
            ?policy,
            "Pool created"
        );
        Ok(Self {
            executor: Mutex::new(Executor::spawn(config.concurrency)),
            tracker: CompletionTracker::new(policy),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[inline]
    pub fn tracker(&self) -> &Arc<CompletionTracker> {
        &self.tracker
    }

    pub(crate) fn executor(&self) -> Arc<Executor> {
        self.executor.lock().clone()
    }

    /// Installs a fresh execution resource of the same size and returns the old one.
    ///
    /// Checked under the executor lock: a `close` either sees the fresh executor
    /// or this call sees the closed flag and installs nothing.
    pub(crate) fn replace_executor(&self) -> Result<Arc<Executor>, PoolError> {
        let mut current = self.executor.lock();
        if self.tracker.is_closed() {
            return Err(PoolError::Closed);
        }
        let fresh = Executor::spawn(self.config.concurrency);
        Ok(std::mem::replace(&mut *current, fresh))
    }

    /// Hands an admitted task to the current executor.
    ///
    /// `preemptible` tasks are dropped at their next await point when the handle is
    /// cancelled; the rest only honour cancellation before they start.
    pub(crate) fn submit<T, Fut>(
        &self,
        mut guard: CompletionGuard,
        body: Fut,
        preemptible: bool,
    ) -> TaskResult<T>
    where
        T: Send + 'static,
        Fut: Future<Output = TaskOutcome<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<TaskOutcome<T>>();
        let cancel_token = CancellationToken::new();
        let ct = cancel_token.clone();
        let handle = TaskResult::new(
            guard.id(),
            guard.name().clone(),
            guard.status().clone(),
            cancel_token,
            rx,
        );
        debug!(task = %guard.name(), task_id = %guard.id(), "Task dispatched");

        let job: Job = Box::pin(async move {
            let result = if ct.is_cancelled() {
                Err(TaskError::Cancelled)
            } else {
                guard.started();
                if preemptible {
                    tokio::select! {
                        biased;
                        _ = ct.cancelled() => Err(TaskError::Cancelled),
                        res = body => res,
                    }
                } else {
                    body.await
                }
            };

            guard.record(&result);
            // Release the slot before publishing, so a caller that sees the result
            // also sees the updated count.
            drop(guard);
            let _ = tx.send(result);
        });

        self.executor().push(job);
        handle
    }

    /// Closes the pool. Idempotent.
    pub async fn close(&self, wait: bool, cancel_pending: bool) {
        let first = self.tracker.close();
        let executor = self.executor();
        let discarded = executor.shutdown(cancel_pending);
        if first {
            info!(
                pool = %self.config.name,
                in_flight = self.tracker.in_flight(),
                discarded,
                wait,
                "Pool closing"
            );
        }
        if wait {
            executor.join().await;
            // A drain in progress may hold the worker handles; admitted tasks still count.
            self.tracker.wait_idle().await;
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            concurrency: self.config.concurrency,
            max_admitted: self.config.max_admitted(),
            in_flight: self.tracker.in_flight(),
            dispatched: self.tracker.dispatched(),
            succeeded: self.tracker.succeeded(),
            failed: self.tracker.failed(),
            cancelled: self.tracker.cancelled(),
            batches: self.tracker.batches(),
        }
    }
}

impl Drop for PoolCore {
    fn drop(&mut self) {
        self.tracker.close();
        self.executor.lock().shutdown(true);
    }
}

impl fmt::Debug for PoolCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolCore")
            .field("config", &self.config)
            .field("state", &self.tracker.snapshot())
            .finish()
    }
}

fn run_async<Fut, T, E>(fut: Fut) -> impl Future<Output = TaskOutcome<T>> + Send + 'static
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    AssertUnwindSafe(fut).catch_unwind().map(|res| match res {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(TaskError::Failed(e.to_string())),
        Err(panic) => Err(TaskError::Panic(panic_message(panic))),
    })
}

async fn run_blocking<F, T, E>(f: F) -> TaskOutcome<T>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let joined =
        tokio::task::spawn_blocking(move || std::panic::catch_unwind(AssertUnwindSafe(f))).await;
    match joined {
        Ok(Ok(Ok(v))) => Ok(v),
        Ok(Ok(Err(e))) => Err(TaskError::Failed(e.to_string())),
        Ok(Err(panic)) => Err(TaskError::Panic(panic_message(panic))),
        Err(join_err) if join_err.is_cancelled() => Err(TaskError::Cancelled),
        Err(join_err) => Err(TaskError::Panic(join_err.to_string())),
    }
}

/// Common contract of the admission-controlled pools.
///
/// Implementors supply the admission policy; dispatching, completion accounting
/// and shutdown are shared through [`PoolCore`].
///
/// A pool has a single owner that dispatches. Calling `dispatch` concurrently
/// with `close` is a usage error: such calls fail with [`PoolError::Closed`] or
/// race with the shutdown.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    #[doc(hidden)]
    fn core(&self) -> &PoolCore;

    /// Waits until the policy admits one more task and reserves its slot.
    #[doc(hidden)]
    async fn admit(&self) -> Result<CompletionGuard, PoolError>;

    fn config(&self) -> &PoolConfig {
        self.core().config()
    }

    fn in_flight(&self) -> usize {
        self.core().tracker().in_flight()
    }

    fn is_closed(&self) -> bool {
        self.core().tracker().is_closed()
    }

    /// True iff some outstanding task is executing right now. Never blocks on tasks.
    fn is_running(&self) -> bool {
        self.core().tracker().is_running()
    }

    fn metrics(&self) -> PoolMetrics {
        self.core().metrics()
    }

    /// Dispatches `task(args)`, waiting for admission first.
    ///
    /// The task's `Err` or panic is logged and surfaces only through the handle.
    async fn dispatch<F, A, Fut, T, E>(&self, task: F, args: A) -> Result<TaskResult<T>, PoolError>
    where
        F: FnOnce(A) -> Fut + Send + 'static,
        A: Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut guard = self.admit().await?;
        guard.set_name(task_name::<F>());
        let body = run_async(async move { task(args).await });
        Ok(self.core().submit(guard, body, true))
    }

    /// Like [`dispatch`](Self::dispatch), with an explicit name for the logs.
    async fn dispatch_named<F, A, Fut, T, E>(
        &self,
        name: &str,
        task: F,
        args: A,
    ) -> Result<TaskResult<T>, PoolError>
    where
        F: FnOnce(A) -> Fut + Send + 'static,
        A: Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut guard = self.admit().await?;
        guard.set_name(Arc::from(name));
        let body = run_async(async move { task(args).await });
        Ok(self.core().submit(guard, body, true))
    }

    /// Dispatches a synchronous closure. It runs on tokio's blocking threads while
    /// holding one worker slot.
    async fn dispatch_blocking<F, A, T, E>(
        &self,
        task: F,
        args: A,
    ) -> Result<TaskResult<T>, PoolError>
    where
        F: FnOnce(A) -> Result<T, E> + Send + 'static,
        A: Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut guard = self.admit().await?;
        guard.set_name(task_name::<F>());
        let body = run_blocking(move || task(args));
        Ok(self.core().submit(guard, body, false))
    }

    /// Dispatches one task per argument set, each admitted on its own.
    ///
    /// Zip several argument sources before calling to get "stop at the shortest".
    async fn dispatch_many<F, I, A, Fut, T, E>(
        &self,
        task: F,
        args: I,
    ) -> Result<Vec<TaskResult<T>>, PoolError>
    where
        F: FnOnce(A) -> Fut + Clone + Send + 'static,
        I: IntoIterator<Item = A> + Send,
        I::IntoIter: Send,
        A: Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut handles = Vec::new();
        for a in args {
            handles.push(self.dispatch(task.clone(), a).await?);
        }
        Ok(handles)
    }

    /// Dispatches every argument set and collects the values in completion order.
    async fn map<F, I, A, Fut, T, E>(
        &self,
        task: F,
        args: I,
        timeout: Option<Duration>,
    ) -> Result<Collection<T>, PoolError>
    where
        F: FnOnce(A) -> Fut + Clone + Send + 'static,
        I: IntoIterator<Item = A> + Send,
        I::IntoIter: Send,
        A: Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let handles = self.dispatch_many(task, args).await?;
        let mut collector = ResultCollector::new();
        if let Some(timeout) = timeout {
            collector = collector.timeout(timeout);
        }
        Ok(collector.collect(handles).await)
    }

    /// Waits until nothing is in flight, without closing.
    async fn join(&self) {
        self.core().tracker().wait_idle().await
    }

    /// Releases the execution resource. Idempotent.
    ///
    /// `wait` blocks until every admitted task finished; `cancel_pending` first
    /// discards tasks that have not started. Must not be awaited from inside a task
    /// running on this pool when `wait` is set.
    async fn close(&self, wait: bool, cancel_pending: bool) {
        self.core().close(wait, cancel_pending).await
    }
}

/// Runs `f` with the pool and closes it afterwards on every exit path, waiting
/// for in-flight tasks. A panic inside `f` is re-raised after the close.
pub async fn scoped<P, F, Fut, R>(pool: Arc<P>, f: F) -> R
where
    P: WorkerPool,
    F: FnOnce(Arc<P>) -> Fut,
    Fut: Future<Output = R>,
{
    let out = AssertUnwindSafe(f(pool.clone())).catch_unwind().await;
    pool.close(true, false).await;
    match out {
        Ok(v) => v,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
