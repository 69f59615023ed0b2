#[cfg(test)]
mod tests {
    use admission_pool::{
        errors::{PoolError, TaskError},
        scoped, BatchWaitPool, Collected, ImmediateRefillPool, PoolConfig, ResultCollector,
        TaskStatus, WorkerPool,
    };
    use std::{
        convert::Infallible,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    async fn sleep_ms(ms: u64) -> Result<u64, Infallible> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ms)
    }

    async fn fail_on_five(i: u32) -> Result<u32, String> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if i == 5 {
            return Err(format!("task {i} refused"));
        }
        Ok(i)
    }

    #[test_log::test(tokio::test)]
    async fn test_fault_isolation() {
        println!("\n=== TEST: one failing task out of ten ===");
        let pool = ImmediateRefillPool::new(3, None).unwrap();

        let handles = pool.dispatch_many(fail_on_five, 0..10).await.unwrap();
        let mut ok = 0;
        for handle in handles {
            match handle.await {
                Ok(_) => ok += 1,
                Err(e) => assert_eq!(e, TaskError::Failed("task 5 refused".into())),
            }
        }
        assert_eq!(ok, 9);

        let metrics = pool.metrics();
        assert_eq!(metrics.succeeded, 9);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.in_flight, 0);

        // Still usable afterwards.
        let again = pool.dispatch(fail_on_five, 42).await.unwrap();
        assert_eq!(again.await, Ok(42));
        println!("  ✓ pool survived the failure");
    }

    #[tokio::test]
    async fn test_batch_pool_fault_isolation() {
        println!("\n=== TEST: failing task in a batch-wait pool ===");
        let pool = BatchWaitPool::new(3, None).unwrap();
        let handles = pool.dispatch_many(fail_on_five, 0..10).await.unwrap();
        let outcomes = futures::future::join_all(handles).await;
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 9);

        let again = pool.dispatch(fail_on_five, 1).await.unwrap();
        assert_eq!(again.await, Ok(1));
        pool.close(true, false).await;
    }

    #[tokio::test]
    async fn test_panic_releases_slot() {
        println!("\n=== TEST: panicking task frees its slot ===");
        let previous_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));

        let pool = ImmediateRefillPool::new(1, None).unwrap();
        let boom = pool
            .dispatch(
                |msg: &'static str| async move {
                    if !msg.is_empty() {
                        panic!("{msg}");
                    }
                    Ok::<_, Infallible>(())
                },
                "worker exploded",
            )
            .await
            .unwrap();

        // With a single slot this only gets admitted if the panic released it.
        let next = tokio::time::timeout(Duration::from_secs(2), pool.dispatch(sleep_ms, 1))
            .await
            .expect("dispatch stuck after panic")
            .unwrap();

        assert_eq!(boom.await, Err(TaskError::Panic("worker exploded".into())));
        assert_eq!(next.await, Ok(1));

        std::panic::set_hook(previous_hook);
    }

    #[tokio::test]
    async fn test_collect_timeout_completion_order() {
        println!("\n=== TEST: collect with timeout ===");
        let pool = ImmediateRefillPool::new(5, None).unwrap();
        let handles = pool
            .dispatch_many(sleep_ms, [150, 50, 100, 3_000, 3_000])
            .await
            .unwrap();

        let collection = ResultCollector::new()
            .timeout(Duration::from_millis(600))
            .collect(handles)
            .await;

        assert_eq!(collection.pending.len(), 2);
        assert_eq!(collection.failed(), 0);
        assert_eq!(collection.values(), vec![50, 100, 150]);
        pool.close(false, true).await;
    }

    #[tokio::test]
    async fn test_map_zips_arguments() {
        println!("\n=== TEST: map stops at the shortest argument source ===");
        let pool = ImmediateRefillPool::new(4, None).unwrap();
        let names = ["a", "b", "c"];
        let delays = [60u64, 10, 30, 5, 5];

        let collection = pool
            .map(
                |(name, ms): (&'static str, u64)| async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok::<_, Infallible>(name)
                },
                names.into_iter().zip(delays),
                None,
            )
            .await
            .unwrap();

        assert_eq!(collection.values(), vec!["b", "c", "a"]);
        assert_eq!(pool.metrics().dispatched, 3);
    }

    #[tokio::test]
    async fn test_is_running() {
        println!("\n=== TEST: is_running polling ===");
        let pool = ImmediateRefillPool::new(2, None).unwrap();
        assert!(!pool.is_running());

        let handle = pool.dispatch(sleep_ms, 100).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(pool.is_running());
        assert_eq!(handle.status(), TaskStatus::Running);

        pool.join().await;
        assert!(!pool.is_running());
        assert_eq!(handle.status(), TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_close_cancels_pending() {
        println!("\n=== TEST: close with cancel_pending ===");
        let pool = ImmediateRefillPool::with_config(PoolConfig::new(1).with_max_admitted(5)).unwrap();

        let handles = pool.dispatch_many(sleep_ms, [100, 100, 100, 100]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handles[1].status(), TaskStatus::Pending);

        pool.close(true, true).await;

        let outcomes = futures::future::join_all(handles).await;
        assert_eq!(outcomes[0], Ok(100));
        for outcome in &outcomes[1..] {
            assert_eq!(outcome, &Err(TaskError::Cancelled));
        }

        let metrics = pool.metrics();
        assert_eq!(metrics.cancelled, 3);
        assert_eq!(metrics.in_flight, 0);
        assert_eq!(
            pool.dispatch(sleep_ms, 1).await.unwrap_err(),
            PoolError::Closed
        );
    }

    #[tokio::test]
    async fn test_drop_discards_queued_work() {
        println!("\n=== TEST: dropping a pool without close ===");
        let pool = ImmediateRefillPool::with_config(PoolConfig::new(1).with_max_admitted(3)).unwrap();
        let handles = pool.dispatch_many(sleep_ms, [50, 50, 50]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(pool);

        let outcomes = futures::future::join_all(handles).await;
        assert_eq!(
            outcomes,
            vec![Ok(50), Err(TaskError::Cancelled), Err(TaskError::Cancelled)]
        );
        println!("  ✓ queued tasks cancelled, running task finished");
    }

    #[tokio::test]
    async fn test_close_waits_for_queued_work() {
        println!("\n=== TEST: close(wait) runs queued tasks ===");
        let pool = ImmediateRefillPool::with_config(PoolConfig::new(2).with_max_admitted(6)).unwrap();
        let handles = pool.dispatch_many(sleep_ms, [20; 6]).await.unwrap();

        pool.close(true, false).await;
        assert!(handles.iter().all(|h| h.status() == TaskStatus::Succeeded));
        assert_eq!(pool.metrics().succeeded, 6);
    }

    #[tokio::test]
    async fn test_scoped_closes_on_every_path() {
        println!("\n=== TEST: scoped acquisition ===");
        let done = Arc::new(AtomicUsize::new(0));

        let pool = BatchWaitPool::new(2, None).unwrap();
        let counter = done.clone();
        let result: Result<(), String> = scoped(pool.clone(), |pool| async move {
            for _ in 0..3 {
                let counter = counter.clone();
                pool.dispatch(
                    move |ms: u64| async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, Infallible>(())
                    },
                    30,
                )
                .await
                .map_err(|e| e.to_string())?;
            }
            Err("caller loop bailed out".to_string())
        })
        .await;

        assert!(result.is_err());
        assert!(pool.is_closed());
        assert_eq!(done.load(Ordering::SeqCst), 3, "close waited for in-flight work");
    }

    #[tokio::test]
    async fn test_handle_cancel_and_timeout() {
        println!("\n=== TEST: cooperative cancel and await_timeout ===");
        let pool = ImmediateRefillPool::new(2, None).unwrap();

        let long = pool.dispatch(sleep_ms, 10_000).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        long.cancel();
        assert!(long.is_cancelled());
        assert_eq!(long.await, Err(TaskError::Cancelled));

        let slow = pool.dispatch(sleep_ms, 10_000).await.unwrap();
        assert_eq!(
            slow.await_timeout(Duration::from_millis(50)).await,
            Err(TaskError::Timeout)
        );

        pool.close(false, true).await;
    }

    #[tokio::test]
    async fn test_blocking_tasks_respect_limit() {
        println!("\n=== TEST: blocking dispatch ===");
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = ImmediateRefillPool::new(2, None).unwrap();

        let mut handles = Vec::new();
        for i in 0..6u32 {
            let (current, peak) = (current.clone(), peak.clone());
            let handle = pool
                .dispatch_blocking(
                    move |i: u32| {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, Infallible>(i * i)
                    },
                    i,
                )
                .await
                .unwrap();
            handles.push(handle);
        }

        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(results, vec![0, 1, 4, 9, 16, 25]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_collector_reports_failures_separately() {
        println!("\n=== TEST: skipped vs failed ===");
        let pool = ImmediateRefillPool::new(4, None).unwrap();
        let handles = pool
            .dispatch_many(
                |v: i32| async move {
                    if v < 0 {
                        anyhow::bail!("negative input {v}");
                    }
                    Ok(v)
                },
                [3, 0, -1, 5],
            )
            .await
            .unwrap();

        let collection = ResultCollector::new()
            .skip_if(|v: &i32| *v == 0)
            .collect(handles)
            .await;

        assert_eq!(collection.outcomes.len(), 4);
        assert_eq!(collection.skipped(), 1);
        assert_eq!(collection.failed(), 1);
        assert!(collection
            .outcomes
            .iter()
            .any(|c| matches!(c, Collected::Failed { error: TaskError::Failed(_), .. })));
    }

    #[tokio::test]
    async fn test_named_dispatch() {
        let pool = ImmediateRefillPool::new(1, None).unwrap();
        let handle = pool
            .dispatch_named("fetch-homepage", sleep_ms, 1)
            .await
            .unwrap();
        assert_eq!(handle.name(), "fetch-homepage");

        let unnamed = pool.dispatch(sleep_ms, 1).await.unwrap();
        assert!(unnamed.name().ends_with("sleep_ms"));
        assert_ne!(handle.id(), unnamed.id());
    }

    #[tokio::test]
    async fn test_invalid_config() {
        assert!(matches!(
            ImmediateRefillPool::new(0, None),
            Err(PoolError::InvalidConfig(_))
        ));
        assert!(matches!(
            BatchWaitPool::new(2, Some(0)),
            Err(PoolError::InvalidConfig(_))
        ));
    }
}
