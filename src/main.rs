use coroutine_pool::{Config, SuspendableTask, ThreadPool};
use std::{
    io::Write,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};
use tracing::info;
use tracing_subscriber::EnvFilter;


fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pool = match ThreadPool::with_config(Config::io_bound().with_thread_name_prefix("log-writer")) {
        Ok(pool) => Arc::new(pool),
        Err(err) => {
            eprintln!("failed to start log writers: {err}");
            std::process::exit(1);
        }
    };

    let sink = Arc::new(Mutex::new(Vec::<u8>::new()));
    let now = Instant::now();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let pool = pool.clone();
            let sink = sink.clone();
            SuspendableTask::new(async move {
                let origin = thread::current().id();
                let written = pool
                    .submit(move || {
                        // Имитация медленной записи на диск
                        thread::sleep(Duration::from_millis(5));
                        let line = format!("record #{i}\n");
                        let ok = sink
                            .lock()
                            .map(|mut buf| buf.write_all(line.as_bytes()).is_ok())
                            .unwrap_or(false);
                        ok
                    })
                    .await;
                info!(
                    record = i,
                    ok = matches!(written, Ok(true)),
                    origin = ?origin,
                    resumed_on = ?thread::current().name(),
                    "log record flushed"
                );
            })
        })
        .collect();

    for task in &tasks {
        task.start();
    }
    for task in &tasks {
        if let Err(err) = task.wait_timeout(Duration::from_secs(5)) {
            eprintln!("log task failed: {err}");
        }
    }

    let bytes = sink.lock().map(|buf| buf.len()).unwrap_or_default();
    println!("flushed {bytes} bytes, elapsed: {:?}", now.elapsed());
    println!("{:?}", pool.metrics());
}
