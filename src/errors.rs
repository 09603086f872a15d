use std::{any::Any, io};

/// Ошибки построения пула
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to spawn worker thread #{index}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
}

/// Результат отдельной задачи, доставляется тому, кто её ждёт
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("timed out waiting for task")]
    Timeout,
    #[error("task was released before its outcome could be observed")]
    Released,
}

impl TaskError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TaskError::Panicked(panic_message(payload.as_ref()))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
