//! Admission-controlled async worker pools.
//!
//! A producer dispatches an unbounded stream of tasks onto a fixed set of
//! workers. `dispatch` applies backpressure once the pool is saturated, under one
//! of two policies:
//! - [`BatchWaitPool`]: after a full batch, wait for the whole batch and start over
//!   on a fresh set of workers.
//! - [`ImmediateRefillPool`]: every completion immediately admits one waiting task.
//!
//! Task failures never reach the dispatcher; they are logged and reported through
//! the task's [`TaskResult`] handle. [`ResultCollector`] drains handles in
//! completion order.

pub mod batch;
pub mod collector;
pub mod errors;
pub mod executor;
pub mod gate;
pub mod handle;
pub mod model;
pub mod pool;
pub mod refill;
pub mod tracker;

pub use batch::{BatchState, BatchWaitPool};
pub use collector::ResultCollector;
pub use errors::{PoolError, TaskError, TaskOutcome};
pub use handle::{TaskId, TaskResult, TaskStatus};
pub use model::{Collected, Collection, PoolMetrics};
pub use pool::{scoped, PoolConfig, WorkerPool};
pub use refill::ImmediateRefillPool;
