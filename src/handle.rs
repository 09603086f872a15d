use super::{
    errors::TaskError,
    pool::{Job, Shared},
};
use std::{
    future::Future,
    mem,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use futures::task::{waker, ArcWake, AtomicWaker};
use parking_lot::Mutex;


/// Ячейка передачи результата от воркера ожидающему
struct Handoff<T> {
    outcome: Mutex<Option<Result<T, TaskError>>>,
    waker: AtomicWaker,
}

impl<T> Handoff<T> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            waker: AtomicWaker::new(),
        }
    }
}

impl<T: Send> ArcWake for Handoff<T> {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.waker.wake();
    }
}

enum State<T> {
    Init {
        shared: Arc<Shared>,
        work: Box<dyn FnOnce() -> T + Send + 'static>,
    },
    Waiting(Arc<Handoff<T>>),
    Done,
}


/// Awaitable, возвращаемый [`ThreadPool::submit`](crate::ThreadPool::submit)
///
/// Ничего не делает до первого опроса. Первый опрос всегда `Pending`: он упаковывает
/// `{работа, продолжение}` в один элемент очереди и отдаёт его пулу. Воркер выполняет
/// работу, сохраняет результат и будит продолжение на своём потоке.
///
/// Паника внутри работы приходит сюда как [`TaskError::Panicked`].
#[must_use = "submitted work is only queued once the future is polled"]
pub struct Submit<T> {
    state: State<T>,
}

impl<T: Send + 'static> Submit<T> {
    pub(crate) fn new<F>(shared: Arc<Shared>, f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            state: State::Init {
                shared,
                work: Box::new(f),
            },
        }
    }
}

impl<T: Send + 'static> Future for Submit<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match mem::replace(&mut this.state, State::Done) {
            State::Init { shared, work } => {
                let handoff = Arc::new(Handoff::new());
                handoff.waker.register(cx.waker());

                let slot = Arc::clone(&handoff);
                let job = Job::new(
                    move || {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(work))
                            .map_err(TaskError::from_panic);
                        let status = match &outcome {
                            Ok(_) => Ok(()),
                            Err(err) => Err(err.clone()),
                        };
                        *slot.outcome.lock() = Some(outcome);
                        status
                    },
                    Some(waker(Arc::clone(&handoff))),
                );

                shared.push(job);
                this.state = State::Waiting(handoff);
                Poll::Pending
            }
            State::Waiting(handoff) => {
                // Сначала регистрация, потом проверка: пробуждение между ними не теряется
                handoff.waker.register(cx.waker());
                let outcome = handoff.outcome.lock().take();
                match outcome {
                    Some(outcome) => Poll::Ready(outcome),
                    None => {
                        this.state = State::Waiting(handoff);
                        Poll::Pending
                    }
                }
            }
            State::Done => Poll::Ready(Err(TaskError::Released)),
        }
    }
}
