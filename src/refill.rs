//! Immediate-refill admission: every completion frees exactly one slot and wakes
//! exactly one blocked dispatcher, so the pool stays saturated without batch
//! boundaries.

use super::{
    errors::PoolError,
    gate::Wake,
    pool::{PoolConfig, PoolCore, WorkerPool},
    tracker::{CompletionGuard, SignalPolicy},
};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug)]
pub struct ImmediateRefillPool {
    core: PoolCore,
}

impl ImmediateRefillPool {
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
            core: PoolCore::new(config, SignalPolicy::EachCompletion)?,
        }))
    }
}

#[async_trait]
impl WorkerPool for ImmediateRefillPool {
    fn core(&self) -> &PoolCore {
        &self.core
    }

    async fn admit(&self) -> Result<CompletionGuard, PoolError> {
        let tracker = self.core.tracker();
        let limit = self.core.config().max_admitted();
        tracker
            .gate()
            .wait_for(Wake::SlotFreed, || tracker.try_reserve(limit))
            .await
    }
}
