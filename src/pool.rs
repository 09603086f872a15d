use super::{
    config::Config,
    errors::{panic_message, PoolError, TaskError},
    handle::Submit,
    model::PoolMetrics,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::Waker,
    thread::{self, JoinHandle, ThreadId},
};
use crossbeam::deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};


pub(crate) type Work = Box<dyn FnOnce() -> Result<(), TaskError> + Send + 'static>;

/// Элемент очереди: работа плюс (необязательно) продолжение, которое будится после неё
pub(crate) struct Job {
    work: Work,
    continuation: Option<Waker>,
}

impl Job {
    pub(crate) fn new<F>(work: F, continuation: Option<Waker>) -> Self
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        Self {
            work: Box::new(work),
            continuation,
        }
    }
}


/// Состояние, общее для пула, его воркеров и ещё не опрошенных `Submit`
pub(crate) struct Shared {
    queue: Injector<Job>,
    stop: CancellationToken,
    idle: Mutex<()>,
    wake: Condvar,
    queued: AtomicUsize,
    submitted: AtomicUsize,
    executed: AtomicUsize,
    panicked: AtomicUsize,
}

impl Shared {
    fn new() -> Self {
        Self {
            queue: Injector::new(),
            stop: CancellationToken::new(),
            idle: Mutex::new(()),
            wake: Condvar::new(),
            queued: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
            executed: AtomicUsize::new(0),
            panicked: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push(&self, job: Job) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.queued.fetch_add(1, Ordering::Relaxed);
        self.queue.push(job);

        // Будим под локом: воркер перепроверяет очередь под ним же, сигнал не теряется
        let _guard = self.idle.lock();
        self.wake.notify_one();
    }

    #[inline]
    fn steal(&self) -> Option<Job> {
        loop {
            match self.queue.steal() {
                Steal::Success(job) => {
                    self.queued.fetch_sub(1, Ordering::Relaxed);
                    return Some(job);
                }
                Steal::Retry => continue,
                Steal::Empty => return None,
            }
        }
    }

    /// Блокирует воркер до появления задачи. `None` только если stop выставлен и очередь пуста
    fn next_job(&self) -> Option<Job> {
        loop {
            if let Some(job) = self.steal() {
                return Some(job);
            }

            let mut guard = self.idle.lock();
            if !self.queue.is_empty() {
                continue;
            }
            if self.stop.is_cancelled() {
                return None;
            }
            self.wake.wait(&mut guard);
        }
    }

    fn run(&self, job: Job) {
        let Job { work, continuation } = job;

        let outcome = panic::catch_unwind(AssertUnwindSafe(work));
        self.executed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "submitted task failed, reporting to awaiting caller");
            }
            Err(payload) => {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                error!(panic = %panic_message(payload.as_ref()), "detached task panicked");
            }
        }

        // Продолжение исполняется прямо здесь, на потоке воркера
        if let Some(continuation) = continuation {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| continuation.wake())) {
                error!(panic = %panic_message(payload.as_ref()), "continuation panicked on resume");
            }
        }
    }

    fn drain(&self) -> usize {
        let mut abandoned = 0;
        while let Some(job) = self.steal() {
            drop(job);
            abandoned += 1;
        }
        abandoned
    }
}

fn worker_loop(index: usize, shared: Arc<Shared>) {
    trace!(worker = index, "worker started");
    while let Some(job) = shared.next_job() {
        shared.run(job);
    }
    trace!(worker = index, "worker exited");
}


/// Пул OS-потоков фиксированного размера
///
/// Размер задаётся один раз при создании. Drop (или [`ThreadPool::shutdown`]) выставляет stop,
/// будит всех воркеров и ждёт, пока они выберут очередь до конца и завершатся.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    worker_ids: Vec<ThreadId>,
    config: Config,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        Self::with_config(Config::default().with_threads(num_threads))
    }

    pub fn with_config(config: Config) -> Result<Self, PoolError> {
        if config.num_threads == 0 {
            warn!("thread pool created with zero workers, submitted work will never run");
        }

        let mut pool = ThreadPool {
            shared: Arc::new(Shared::new()),
            workers: Vec::with_capacity(config.num_threads),
            worker_ids: Vec::with_capacity(config.num_threads),
            config,
        };

        // При ошибке `pool` дропается и успевшие стартовать воркеры join-ятся
        for index in 0..pool.config.num_threads {
            let mut builder = thread::Builder::new().name(pool.config.thread_name(index));
            if let Some(size) = pool.config.stack_size {
                builder = builder.stack_size(size);
            }

            let shared = Arc::clone(&pool.shared);
            let handle = builder
                .spawn(move || worker_loop(index, shared))
                .map_err(|source| PoolError::Spawn { index, source })?;

            pool.worker_ids.push(handle.thread().id());
            pool.workers.push(handle);
        }

        info!(
            workers = pool.config.num_threads,
            prefix = %pool.config.thread_name_prefix,
            "thread pool started"
        );
        Ok(pool)
    }

    /// Awaitable-мост: при первом опросе кладёт `f` в очередь и всегда уходит в `Pending`
    pub fn submit<F, T>(&self, f: F) -> Submit<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Submit::new(Arc::clone(&self.shared), f)
    }

    /// Fire-and-forget: задача без продолжения
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.push(Job::new(
            move || {
                f();
                Ok(())
            },
            None,
        ));
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.config.num_threads
    }

    pub fn worker_ids(&self) -> &[ThreadId] {
        &self.worker_ids
    }

    pub fn is_worker_thread(&self) -> bool {
        self.worker_ids.contains(&thread::current().id())
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            workers: self.config.num_threads,
            queued_tasks: self.shared.queued.load(Ordering::Relaxed),
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            executed: self.shared.executed.load(Ordering::Relaxed),
            panicked: self.shared.panicked.load(Ordering::Relaxed),
        }
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if self.shared.stop.is_cancelled() && self.workers.is_empty() {
            return;
        }

        self.shared.stop.cancel();
        {
            let _guard = self.shared.idle.lock();
            self.shared.wake.notify_all();
        }

        let current = thread::current().id();
        let mut detached = false;
        for handle in self.workers.drain(..) {
            if handle.thread().id() == current {
                // Последний владелец пула дропнул его из продолжения на этом же воркере
                warn!("thread pool dropped on its own worker, detaching that worker");
                detached = true;
                continue;
            }
            if handle.join().is_err() {
                error!("worker thread terminated abnormally");
            }
        }

        if !detached {
            let abandoned = self.shared.drain();
            if abandoned > 0 {
                debug!(abandoned, "dropped queued entries that no worker will run");
            }
        }
        info!("thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn worker_names_follow_prefix() {
        let pool = ThreadPool::with_config(
            Config::default().with_threads(2).with_thread_name_prefix("log-io"),
        )
        .unwrap();

        let (tx, rx) = mpsc::channel();
        pool.execute(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        });
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name == "log-io-0" || name == "log-io-1", "unexpected name {name}");
        assert_eq!(pool.worker_ids().len(), 2);
        assert!(!pool.is_worker_thread());
    }

    #[test]
    fn shutdown_drains_queue_before_exit() {
        let pool = ThreadPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn zero_workers_abandon_everything() {
        let pool = ThreadPool::new(0).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(pool.metrics().queued_tasks, 5);
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn detached_panic_does_not_kill_worker() {
        let pool = ThreadPool::new(1).unwrap();
        pool.execute(|| panic!("detached failure"));

        let (tx, rx) = mpsc::channel();
        pool.execute(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Счётчик executed второй задачи может ещё не обновиться, первой обязан
        let metrics = pool.metrics();
        assert!(metrics.executed >= 1);
        assert_eq!(metrics.panicked, 1);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn spawn_failure_is_reported_without_hanging() {
        // Стек больше пользовательского адресного пространства: mmap гарантированно откажет
        let config = Config::default()
            .with_threads(2)
            .with_stack_size(1usize << 50);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(ThreadPool::with_config(config).map(|pool| pool.num_threads()));
        });

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Err(PoolError::Spawn { index, source }) => {
                assert_eq!(index, 0);
                assert!(!source.to_string().is_empty());
            }
            Ok(n) => panic!("pool with {n} workers started despite impossible stack size"),
        }
    }
}
