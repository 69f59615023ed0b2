/// Errors returned to the dispatching caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// `dispatch` was called after `close` started.
    #[error("pool is closed")]
    Closed,
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Why a dispatched task did not produce a value.
#[derive(Debug, PartialEq, PartialOrd, Eq, Ord, Clone, thiserror::Error)]
pub enum TaskError {
    /// The task returned an error.
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panic(String),
    /// The task was discarded before it started, or cancelled through its handle.
    #[error("task cancelled")]
    Cancelled,
    #[error("timed out waiting for task")]
    Timeout,
}

pub type TaskOutcome<T> = Result<T, TaskError>;

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
