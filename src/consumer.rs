use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::{Error, Promise};

/// Awaits a [`Promise`]. The consumer returns a `Result<T, E>`.
///
/// The promise's handlers still run through its host's scheduler, so the
/// consumer only completes while that scheduler is being driven. Pairing a
/// host built on a `LocalPool` spawner with the same pool does exactly that.
///
/// # Examples
///
/// ```
/// use futures::executor::LocalPool;
/// use promise_aplus::{Error, Host, Promise};
/// use std::future::IntoFuture;
///
/// let mut pool = LocalPool::new();
/// let host = Host::builder().scheduler(pool.spawner()).build();
/// let answer: Promise<i32, Error> = host.resolve(21).then(|v: i32| Ok(v * 2));
/// assert_eq!(pool.run_until(answer.into_future()), Ok(42));
/// ```
#[derive(Debug)]
pub struct Consumer<T, E> {
    promise: Rc<RefCell<Inner<T, E>>>,
}

#[derive(Debug)]
enum WakerState {
    Fresh,
    Tainted,
}

#[derive(Debug)]
struct Inner<T, E> {
    value: Option<Result<T, E>>,
    waker: Result<Waker, WakerState>,
}

impl<T, E> Inner<T, E> {
    fn settle(&mut self, value: Result<T, E>) {
        self.value = Some(value);
        if let Ok(waker) = std::mem::replace(&mut self.waker, Err(WakerState::Tainted)) {
            waker.wake()
        }
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Consumer<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        let inner = Rc::new(RefCell::new(Inner {
            value: None,
            waker: Err(WakerState::Fresh),
        }));
        let (fulfilled, rejected) = (inner.clone(), inner.clone());
        self.resolver().add_callbacks(
            Box::new(move |value| fulfilled.borrow_mut().settle(Ok(value))),
            Box::new(move |reason| rejected.borrow_mut().settle(Err(reason))),
        );
        Consumer { promise: inner }
    }
}

impl<T, E> Future for Consumer<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut promise = self.promise.borrow_mut();
        match promise.value.take() {
            Some(value) => Poll::Ready(value),
            None => match std::mem::replace(&mut promise.waker, Ok(cx.waker().clone())) {
                Err(WakerState::Tainted) => panic!("`Consumer` polled after completion"),
                _ => Poll::Pending,
            },
        }
    }
}
