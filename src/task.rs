//! Одноразовая ленивая задача с единственным слотом продолжения.
//!
//! Waker задачи и есть её продолжение: кто его разбудил, на том потоке задача и
//! продолжается. После `await` на [`Submit`](crate::Submit) это поток воркера пула,
//! поэтому полагаться на thread-local состояние через точку приостановки нельзя.

use super::errors::TaskError;
use std::{
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use futures::task::{waker_ref, ArcWake};
use parking_lot::Mutex;
use tracing::{error, trace};


type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Создана и ещё ни разу не запускалась
    Created = 0,
    Running = 1,
    /// Приостановлена, ждёт пробуждения
    Suspended = 2,
    Completed = 3,
    /// Владелец отпустил задачу до её завершения
    Released = 4,
}

const CREATED: u8 = TaskState::Created as u8;
const RUNNING: u8 = TaskState::Running as u8;
const SUSPENDED: u8 = TaskState::Suspended as u8;
const COMPLETED: u8 = TaskState::Completed as u8;
const RELEASED: u8 = TaskState::Released as u8;
// Running, и пока шёл poll, пришло пробуждение
const NOTIFIED: u8 = 5;

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            CREATED => TaskState::Created,
            RUNNING | NOTIFIED => TaskState::Running,
            SUSPENDED => TaskState::Suspended,
            COMPLETED => TaskState::Completed,
            _ => TaskState::Released,
        }
    }
}


/// Future опрашивает только тот, кто перевёл состояние в RUNNING. Пробуждение никогда
/// не ждёт чужого poll: оно либо забирает SUSPENDED задачу себе, либо ставит NOTIFIED.
struct TaskCell {
    state: AtomicU8,
    released: AtomicBool,
    future: Mutex<Option<BoxFuture>>,
    failure: Mutex<Option<TaskError>>,
    // Дроп отправителя = сигнал завершения для всех ждущих
    done: Mutex<Option<Sender<()>>>,
}

impl TaskCell {
    #[inline]
    fn id(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    #[inline]
    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    fn transition(&self, from: u8, to: u8) -> Result<u8, u8> {
        self.state
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
    }

    #[inline]
    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn start(self: &Arc<Self>) -> bool {
        if self.is_released() || self.transition(CREATED, RUNNING).is_err() {
            return false;
        }
        trace!(task = self.id(), "task started");
        self.run();
        true
    }

    /// Возобновление по waker-у. Не блокируется
    fn resume(self: &Arc<Self>) {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            let next = match current {
                SUSPENDED => RUNNING,
                RUNNING => NOTIFIED,
                _ => return,
            };
            match self.transition(current, next) {
                Ok(_) if next == RUNNING => {
                    trace!(task = self.id(), "task resumed");
                    self.run();
                    return;
                }
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Опрос на текущем потоке. Вызывающий только что перевёл состояние в RUNNING
    fn run(self: &Arc<Self>) {
        let mut slot = self.future.lock();
        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);

        let outcome = loop {
            if self.is_released() {
                break None;
            }
            let Some(future) = slot.as_mut() else {
                break None;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
                Ok(Poll::Ready(())) => break Some(Ok(())),
                Err(payload) => break Some(Err(TaskError::from_panic(payload))),
                Ok(Poll::Pending) => {}
            }

            if self.transition(RUNNING, SUSPENDED).is_ok() {
                drop(slot);
                // Владелец мог отпустить задачу, пока шёл poll
                if self.is_released() {
                    self.discard_suspended();
                }
                return;
            }
            // Из RUNNING состояние уводят только пробуждения, значит сейчас NOTIFIED
            self.state.store(RUNNING, Ordering::SeqCst);
        };

        // Future дропается до публикации итога, пробуждения из его drop падают в NOTIFIED
        let future = slot.take();
        drop(slot);
        drop(future);

        match outcome {
            None => {
                self.state.store(RELEASED, Ordering::SeqCst);
                trace!(task = self.id(), "task released mid-flight");
            }
            Some(result) => {
                if let Err(err) = result {
                    error!(task = self.id(), error = %err, "suspendable task panicked");
                    *self.failure.lock() = Some(err);
                }
                self.state.store(COMPLETED, Ordering::SeqCst);
                trace!(task = self.id(), "task completed");
            }
        }
        self.done.lock().take();
    }

    fn discard_suspended(&self) {
        if self.transition(SUSPENDED, RELEASED).is_ok() {
            let future = self.future.lock().take();
            drop(future);
            self.done.lock().take();
        }
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        if self.transition(CREATED, RELEASED).is_ok() {
            let future = self.future.lock().take();
            drop(future);
            self.done.lock().take();
            return;
        }
        // RUNNING/NOTIFIED: текущий поллер увидит флаг и освободит future сам
        self.discard_suspended();
    }
}

impl ArcWake for TaskCell {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.resume();
    }
}


/// Приостанавливаемое вычисление с единственным владельцем
///
/// Создаётся в состоянии [`TaskState::Created`] и само не стартует. [`start`](Self::start)
/// опрашивает его на текущем потоке до первой приостановки; дальше его ведут пробуждения.
/// Если пробуждение приходит, пока задачу опрашивает другой поток, тот опросит её ещё раз
/// сам. Drop выставляет флаг "released", который проверяется перед каждым возобновлением,
/// и освобождает future; идущий в этот момент poll освободит его по завершении.
pub struct SuspendableTask {
    cell: Arc<TaskCell>,
    done: Receiver<()>,
}

impl SuspendableTask {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        Self {
            cell: Arc::new(TaskCell {
                state: AtomicU8::new(TaskState::Created as u8),
                released: AtomicBool::new(false),
                future: Mutex::new(Some(Box::pin(future))),
                failure: Mutex::new(None),
                done: Mutex::new(Some(tx)),
            }),
            done: rx,
        }
    }

    /// Первое возобновление. `false`, если задача уже запускалась
    pub fn start(&self) -> bool {
        self.cell.start()
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.cell.state()
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state() == TaskState::Completed
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), TaskError> {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => Err(TaskError::Timeout),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match self.state() {
                TaskState::Completed => match self.cell.failure.lock().clone() {
                    Some(err) => Err(err),
                    None => Ok(()),
                },
                _ => Err(TaskError::Released),
            },
        }
    }
}

impl Drop for SuspendableTask {
    fn drop(&mut self) {
        self.cell.release();
    }
}

impl std::fmt::Debug for SuspendableTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspendableTask")
            .field("state", &self.state())
            .finish()
    }
}
