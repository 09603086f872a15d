//! Пул потоков фиксированного размера с мостом suspend/resume
//!
//! Вызывающий код не регистрирует колбэки явно: он `await`-ит [`ThreadPool::submit`],
//! а остаток его логики продолжается уже на одном из воркеров пула.
//!
//! # Features
//! - Фиксированное число OS-потоков, создаются сразу
//! - Неограниченная FIFO-очередь, один производитель видит свой порядок
//! - [`SuspendableTask`]: ленивая задача, которая возобновляется на том потоке, что её разбудил
//! - Паника в задаче не роняет процесс, а доставляется ожидающему как [`TaskError::Panicked`]
//! - Shutdown при drop: воркеры дорабатывают очередь и join-ятся

pub mod config;
pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;
pub mod task;

pub use config::Config;
pub use errors::{PoolError, TaskError};
pub use handle::Submit;
pub use model::PoolMetrics;
pub use pool::ThreadPool;
pub use task::{SuspendableTask, TaskState};
