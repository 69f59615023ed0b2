use admission_pool::{BatchWaitPool, ImmediateRefillPool, PoolConfig, WorkerPool};
use anyhow::Result;
use std::{sync::Arc, time::Instant};
use tokio::{runtime::Builder, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const UNIT: Duration = Duration::from_millis(200);

async fn job(units: u32) -> Result<u32> {
    tracing::debug!(units, "job running");
    tokio::time::sleep(UNIT * units).await;
    Ok(units)
}

async fn run<P: WorkerPool>(label: &str, pool: Arc<P>, durations: &[u32]) -> Result<()> {
    let now = Instant::now();
    let handles = pool.dispatch_many(job, durations.to_vec()).await?;
    pool.close(true, false).await;
    for handle in handles {
        handle.await?;
    }
    let metrics = pool.metrics();
    tracing::info!(
        policy = label,
        elapsed = ?now.elapsed(),
        succeeded = metrics.succeeded,
        batches = metrics.batches,
        "all tasks done"
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "admission_pool=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rt = Builder::new_multi_thread().enable_all().build()?;

    rt.block_on(async {
        let mut config = PoolConfig::from_env()?;
        if std::env::var("POOL_CONCURRENCY").is_err() {
            config.concurrency = 3;
        }
        let durations = [1, 1, 5, 1, 1, 1];

        let batch = BatchWaitPool::with_config(config.clone().with_name("batch-wait"))?;
        run("batch-wait", batch, &durations).await?;

        let refill = ImmediateRefillPool::with_config(config.with_name("immediate-refill"))?;
        run("immediate-refill", refill, &durations).await?;
        Ok::<(), anyhow::Error>(())
    })
}
