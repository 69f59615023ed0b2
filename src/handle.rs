use super::errors::{TaskError, TaskOutcome};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    task::{Context, Poll},
};
use tokio::{sync::oneshot, time::Duration};
use tokio_util::sync::CancellationToken;

/// Unit of work as the executor sees it: fully wrapped, result already routed.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Identifier assigned to each dispatched task, unique per pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Admitted, waiting for a free worker.
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Succeeded,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }
}

/// Status shared between a handle, the pool's outstanding set and the running job.
#[derive(Debug, Default)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    #[inline]
    pub(crate) fn get(&self) -> TaskStatus {
        TaskStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set(&self, status: TaskStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// Handle on a dispatched task.
///
/// Awaiting it yields the task's outcome. Dropping it does not cancel the task.
pub struct TaskResult<T> {
    id: TaskId,
    name: Arc<str>,
    status: Arc<StatusCell>,
    cancel_token: CancellationToken,
    receiver: oneshot::Receiver<TaskOutcome<T>>,
}

impl<T> TaskResult<T> {
    pub(crate) fn new(
        id: TaskId,
        name: Arc<str>,
        status: Arc<StatusCell>,
        cancel_token: CancellationToken,
        receiver: oneshot::Receiver<TaskOutcome<T>>,
    ) -> Self {
        Self {
            id,
            name,
            status,
            cancel_token,
            receiver,
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn status(&self) -> TaskStatus {
        self.status.get()
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    /// Requests cooperative cancellation.
    ///
    /// An async task is dropped at its next await point; a blocking task is only
    /// cancelled if it has not started yet.
    #[inline]
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub async fn await_timeout(self, timeout: Duration) -> TaskOutcome<T> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TaskError::Cancelled),
            Err(_) => Err(TaskError::Timeout),
        }
    }
}

impl<T> fmt::Debug for TaskResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskResult")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl<T> Future for TaskResult<T> {
    type Output = TaskOutcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            // The sender only goes away without a value when the job was discarded.
            Poll::Ready(res) => Poll::Ready(res.unwrap_or(Err(TaskError::Cancelled))),
            Poll::Pending => Poll::Pending,
        }
    }
}
