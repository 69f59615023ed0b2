use super::{
    errors::TaskOutcome,
    handle::{TaskId, TaskResult},
    model::{Collected, Collection},
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::time::{Duration, Instant};
use tracing::warn;

type SkipFn<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Drains task handles in completion order.
///
/// Failed handles are logged and reported as [`Collected::Failed`]. Nothing is
/// skipped by default: empty or zero values are kept. With a skip predicate,
/// successful values it matches become [`Collected::Skipped`] instead of values. When the timeout expires the remaining handles are returned
/// untouched in [`Collection::pending`]; they keep running.
pub struct ResultCollector<T> {
    timeout: Option<Duration>,
    skip: Option<SkipFn<T>>,
}

impl<T> Default for ResultCollector<T> {
    fn default() -> Self {
        Self {
            timeout: None,
            skip: None,
        }
    }
}

impl<T> fmt::Debug for ResultCollector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCollector")
            .field("timeout", &self.timeout)
            .field("skip", &self.skip.is_some())
            .finish()
    }
}

impl<T> ResultCollector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Treats values matching `pred` as "no result".
    pub fn skip_if<P>(mut self, pred: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(pred));
        self
    }

    pub async fn collect<I>(&self, handles: I) -> Collection<T>
    where
        I: IntoIterator<Item = TaskResult<T>>,
    {
        let mut running: FuturesUnordered<Tagged<T>> =
            handles.into_iter().map(|h| Tagged(Some(h))).collect();
        let mut outcomes = Vec::with_capacity(running.len());
        let deadline = self.timeout.map(|t| Instant::now() + t);

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, running.next()).await {
                    Ok(next) => next,
                    Err(_) => break,
                },
                None => running.next().await,
            };
            let Some((id, name, outcome)) = next else {
                break;
            };
            outcomes.push(self.classify(id, &name, outcome));
        }

        let pending = running
            .into_iter()
            .filter_map(|mut tagged| tagged.0.take())
            .collect();
        Collection { outcomes, pending }
    }

    fn classify(&self, id: TaskId, name: &str, outcome: TaskOutcome<T>) -> Collected<T> {
        match outcome {
            Ok(value) if self.skip.as_ref().is_some_and(|skip| skip(&value)) => {
                Collected::Skipped(id)
            }
            Ok(value) => Collected::Value(value),
            Err(error) => {
                warn!(task = %name, task_id = %id, %error, "Dropping failed result");
                Collected::Failed { id, error }
            }
        }
    }
}

/// Resolves a handle to its outcome while remembering which task it was.
/// Yields the handle back if the collection stops early.
struct Tagged<T>(Option<TaskResult<T>>);

impl<T> Future for Tagged<T> {
    type Output = (TaskId, String, TaskOutcome<T>);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(handle) = this.0.as_mut() else {
            return Poll::Pending;
        };
        match Pin::new(&mut *handle).poll(cx) {
            Poll::Ready(outcome) => {
                let id = handle.id();
                let name = handle.name().to_string();
                this.0 = None;
                Poll::Ready((id, name, outcome))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
