use super::{
    errors::TaskError,
    handle::{TaskId, TaskResult},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetrics {
    pub concurrency: usize,
    pub max_admitted: usize,
    pub in_flight: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Full drains forced by the batch-wait policy.
    pub batches: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.concurrency == 0 {
            return 0.0;
        }
        self.in_flight.min(self.concurrency) as f64 / self.concurrency as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            return 1.0;
        }
        self.succeeded as f64 / total as f64
    }

    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }
}

/// One handle's outcome as seen by the collector.
#[derive(Debug)]
pub enum Collected<T> {
    Value(T),
    /// Finished successfully, but the collector's skip predicate rejected the value.
    Skipped(TaskId),
    Failed { id: TaskId, error: TaskError },
}

impl<T> Collected<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Outcomes in completion order, plus the handles still running at the deadline.
#[derive(Debug)]
pub struct Collection<T> {
    pub outcomes: Vec<Collected<T>>,
    pub pending: Vec<TaskResult<T>>,
}

impl<T> Collection<T> {
    /// Successful, non-skipped values in completion order.
    pub fn values(self) -> Vec<T> {
        self.outcomes
            .into_iter()
            .filter_map(|c| match c {
                Collected::Value(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|c| matches!(c, Collected::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|c| matches!(c, Collected::Skipped(_)))
            .count()
    }

    pub fn timed_out(&self) -> bool {
        !self.pending.is_empty()
    }
}
