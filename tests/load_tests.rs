#[cfg(test)]
mod tests {
    use coroutine_pool::{
        errors::TaskError,
        pool::ThreadPool,
        task::SuspendableTask,
        Config,
    };
    use std::{
        future::Future,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    };

    fn measure<F, T>(name: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        println!("✓ {}: {:?}", name, elapsed);
        result
    }

    async fn measure_async<F, Fut, T>(name: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let start = Instant::now();
        let result = f().await;
        let elapsed = start.elapsed();
        println!("✓ {}: {:?}", name, elapsed);
        result
    }

    #[test]
    fn load_test_1_small_fast_tasks() {
        println!("\n=== LOAD TEST 1: 10k быстрых fire-and-forget задач ===");
        let pool = ThreadPool::with_config(Config::io_bound()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        measure("10k tasks", || {
            for _ in 0..10_000 {
                let counter = counter.clone();
                pool.execute(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
            pool.shutdown();
        });

        assert_eq!(counter.load(Ordering::Relaxed), 10_000);
    }

    #[test]
    fn load_test_2_suspendable_round_trips() {
        println!("\n=== LOAD TEST 2: 1k задач по 3 приостановки ===");
        let pool = Arc::new(ThreadPool::with_config(Config::cpu_bound()).unwrap());
        let lines = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = measure("start 1k tasks", || {
            (0..1_000)
                .map(|i| {
                    let pool = pool.clone();
                    let lines = lines.clone();
                    let task = SuspendableTask::new(async move {
                        for part in 0..3 {
                            let n = pool
                                .submit(move || {
                                    std::thread::sleep(Duration::from_micros(100));
                                    i * 3 + part
                                })
                                .await
                                .unwrap_or(0);
                            if n >= i * 3 {
                                lines.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    });
                    task.start();
                    task
                })
                .collect()
        });

        let completed = measure("wait 1k tasks", || {
            tasks
                .iter()
                .filter(|t| t.wait_timeout(Duration::from_secs(30)).is_ok())
                .count()
        });

        println!("  Завершено: {}/{}", completed, tasks.len());
        assert_eq!(completed, 1_000);
        assert_eq!(lines.load(Ordering::Relaxed), 3_000);

        let metrics = pool.metrics();
        println!("  Запущено: {}, выполнено: {}", metrics.submitted, metrics.executed);
        assert_eq!(metrics.submitted, 3_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn load_test_3_awaited_from_tokio() {
        println!("\n=== LOAD TEST 3: 5k submit из tokio ===");
        let pool = Arc::new(ThreadPool::with_config(Config::io_bound()).unwrap());

        let results = measure_async("5k awaited submits", || async {
            let handles: Vec<_> = (0..5_000u64)
                .map(|i| {
                    let pool = pool.clone();
                    tokio::spawn(async move { pool.submit(move || i % 1000).await })
                })
                .collect();

            let mut results = Vec::with_capacity(handles.len());
            for h in handles {
                results.push(h.await.expect("tokio task"));
            }
            results
        })
        .await;

        let successful = results.iter().filter(|r| r.is_ok()).count();
        println!("  Успешно: {}/{}", successful, results.len());
        assert_eq!(successful, 5_000);
    }

    #[tokio::test]
    async fn load_test_4_stress_with_panics() {
        println!("\n=== LOAD TEST 4: Стресс-тест с паниками ===");

        let pool = ThreadPool::new(8).unwrap();
        let mut failed = 0;
        let mut ok = 0;
        for i in 0..1_000u32 {
            match pool
                .submit(move || {
                    if i % 10 == 0 {
                        panic!("bad record {}", i);
                    }
                    i
                })
                .await
            {
                Ok(v) => {
                    assert_eq!(v, i);
                    ok += 1;
                }
                Err(TaskError::Panicked(msg)) => {
                    assert_eq!(msg, format!("bad record {}", i));
                    failed += 1;
                }
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }

        println!("  Успешно: {}, паник: {}", ok, failed);
        assert_eq!(ok, 900);
        assert_eq!(failed, 100);
        assert!(pool.metrics().panicked >= 99);
    }
}
