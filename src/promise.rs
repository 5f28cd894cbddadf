use std::fmt;

use tracing::debug;

use crate::resolver::{Callback, Resolver, Status};
use crate::thenable::{OnFulfilled, OnRejected, Resolution, Thenable};
use crate::{catch_panic, Error, Host};

/// A value available now or later.
///
/// `Promise` is a cheap handle: clones observe the same settlement. Handlers
/// registered with [`then`](Self::then), [`then_catch`](Self::then_catch) or
/// [`catch`](Self::catch) always run from the host's scheduler, never inside
/// the call that registered them.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Error, Host, Promise};
/// use std::{cell::RefCell, rc::Rc};
///
/// let host = Host::new();
/// let (producer, promise) = host.pair::<i32, Error>();
/// let seen = Rc::new(RefCell::new(None));
/// let sink = seen.clone();
/// let _: Promise<(), Error> = promise
///     .then(|v| Ok(v + 1))
///     .then(move |v: i32| {
///         *sink.borrow_mut() = Some(v);
///         Ok(())
///     });
/// producer.resolve(41);
/// assert_eq!(*seen.borrow(), None);
/// host.run_until_stalled();
/// assert_eq!(*seen.borrow(), Some(42));
/// ```
pub struct Promise<T, E> {
    resolver: Resolver<T, E>,
}

/// The settling side handed to an executor.
///
/// It may be cloned, stored and called any number of times; only the first
/// settlement counts.
pub struct Producer<T, E> {
    resolver: Resolver<T, E>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            resolver: self.resolver.clone(),
        }
    }
}

impl<T, E> Clone for Producer<T, E> {
    fn clone(&self) -> Self {
        Producer {
            resolver: self.resolver.clone(),
        }
    }
}

impl<T, E> Producer<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Resolves with a value, a promise or a foreign thenable.
    pub fn resolve<V: Into<Resolution<T, E>>>(&self, value: V) {
        self.resolver.resolve(value.into());
    }

    pub fn reject(&self, reason: E) {
        self.resolver.reject(reason);
    }

    pub fn status(&self) -> Status {
        self.resolver.status()
    }
}

impl Host {
    /// Creates a promise and runs `executor` synchronously, exactly once.
    ///
    /// An `Err` returned by the executor, or a panic inside it, rejects the
    /// promise instead of escaping.
    pub fn promise<T, E, F>(&self, executor: F) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
        F: FnOnce(Producer<T, E>) -> Result<(), E>,
    {
        let (producer, promise) = self.pair();
        match catch_panic(|| executor(producer.clone())) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => producer.reject(reason),
            Err(panic) => {
                debug!(%panic, "executor panicked");
                producer.reject(panic.into());
            }
        }
        promise
    }

    /// A pending promise together with the handle that settles it.
    pub fn pair<T, E>(&self) -> (Producer<T, E>, Promise<T, E>)
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
    {
        let resolver = Resolver::new(self.clone());
        (
            Producer {
                resolver: resolver.clone(),
            },
            Promise { resolver },
        )
    }
}

impl<T, E> Promise<T, E> {
    pub(crate) fn from_resolver(resolver: Resolver<T, E>) -> Self {
        Promise { resolver }
    }

    pub(crate) fn resolver(&self) -> &Resolver<T, E> {
        &self.resolver
    }

    /// The factory this promise, and everything chained from it, belongs to.
    pub fn host(&self) -> Host {
        self.resolver.host()
    }

    pub fn status(&self) -> Status {
        self.resolver.status()
    }

    /// Whether both handles observe the same settlement.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.resolver.ptr_eq(&other.resolver)
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Creates a promise on [`Host::current`].
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Producer<T, E>) -> Result<(), E>,
    {
        Host::current().promise(executor)
    }

    /// Chains a fulfillment handler. Rejections pass through unchanged.
    ///
    /// The handler may return a plain value or another promise (or thenable),
    /// whose outcome the returned promise then adopts.
    pub fn then<U, V, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        V: Into<Resolution<U, E>>,
        F: FnOnce(T) -> Result<V, E> + 'static,
    {
        self.chain(move |value| on_fulfilled(value).map(Into::into), Err)
    }

    /// Chains both a fulfillment and a rejection handler.
    pub fn then_catch<U, V, W, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        V: Into<Resolution<U, E>>,
        W: Into<Resolution<U, E>>,
        F: FnOnce(T) -> Result<V, E> + 'static,
        R: FnOnce(E) -> Result<W, E> + 'static,
    {
        self.chain(
            move |value| on_fulfilled(value).map(Into::into),
            move |reason| on_rejected(reason).map(Into::into),
        )
    }

    /// Chains a rejection handler. Fulfillment values pass through unchanged.
    pub fn catch<V, R>(&self, on_rejected: R) -> Promise<T, E>
    where
        V: Into<Resolution<T, E>>,
        R: FnOnce(E) -> Result<V, E> + 'static,
    {
        self.chain(
            |value| Ok(Resolution::Value(value)),
            move |reason| on_rejected(reason).map(Into::into),
        )
    }

    fn chain<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        let downstream = Resolver::new(self.host());
        self.resolver.add_callbacks(
            settle_with(&downstream, on_fulfilled),
            settle_with(&downstream, on_rejected),
        );
        Promise {
            resolver: downstream,
        }
    }
}

/// Wraps a handler so its outcome settles `downstream`.
fn settle_with<X, U, E, H>(downstream: &Resolver<U, E>, handler: H) -> Callback<X>
where
    X: 'static,
    U: Clone + 'static,
    E: Clone + From<Error> + 'static,
    H: FnOnce(X) -> Result<Resolution<U, E>, E> + 'static,
{
    let downstream = downstream.clone();
    Box::new(move |input| match catch_panic(|| handler(input)) {
        Ok(Ok(Resolution::Promise(promise))) if promise.resolver.ptr_eq(&downstream) => {
            debug!("handler returned the promise it settles");
            downstream.reject(Error::ChainingCycle.into());
        }
        Ok(Ok(resolution)) => downstream.resolve(resolution),
        Ok(Err(reason)) => downstream.reject(reason),
        Err(panic) => {
            debug!(%panic, "handler panicked");
            downstream.reject(panic.into());
        }
    })
}

/// Lets a promise of this crate be adopted like any other thenable.
impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    fn then(&self, on_fulfilled: OnFulfilled<T, E>, on_rejected: OnRejected<E>) -> Result<(), E> {
        self.resolver.add_callbacks(
            Box::new(move |value| on_fulfilled(Resolution::Value(value))),
            on_rejected,
        );
        Ok(())
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Seen<V> = Rc<RefCell<Vec<V>>>;

    #[test]
    fn test_executor_runs_synchronously() {
        let host = Host::new();
        let ran = Rc::new(RefCell::new(false));
        let flag = ran.clone();
        let promise: Promise<i32, Error> = host.promise(move |producer| {
            *flag.borrow_mut() = true;
            producer.resolve(1);
            Ok(())
        });
        assert!(*ran.borrow());
        assert_eq!(promise.status(), Status::Fulfilled);
    }

    #[test]
    fn test_executor_error_and_panic_reject() {
        let host = Host::new();
        let failed: Promise<i32, Error> = host.promise(|_| Err(Error::ChainingCycle));
        assert_eq!(failed.status(), Status::Rejected);

        let panicked: Promise<i32, Error> = host.promise(|_| panic!("boom"));
        let seen: Seen<Error> = Seen::default();
        let sink = seen.clone();
        let _: Promise<i32, Error> = panicked.catch(move |reason| {
            sink.borrow_mut().push(reason);
            Ok(0)
        });
        host.run_until_stalled();
        assert_eq!(*seen.borrow(), vec![Error::Panicked("boom".into())]);
    }

    #[test]
    fn test_handlers_never_run_inline() {
        let host = Host::new();
        let (producer, promise) = host.pair::<i32, Error>();
        producer.resolve(3);
        let seen: Seen<i32> = Seen::default();
        let sink = seen.clone();
        let _: Promise<(), Error> = promise.then(move |v| {
            sink.borrow_mut().push(v);
            Ok(())
        });
        assert!(seen.borrow().is_empty());
        host.run_until_stalled();
        assert_eq!(*seen.borrow(), vec![3]);
    }

    #[test]
    fn test_chained_promises_share_host() {
        let host = Host::builder().name("custom").build();
        let (_, promise) = host.pair::<i32, Error>();
        let chained: Promise<i32, Error> = promise.then(|v| Ok(v)).catch(|_| Ok(0));
        assert!(chained.host().ptr_eq(&host));
        assert_eq!(chained.host().name(), "custom");
    }

    #[test]
    fn test_handler_panic_rejects_downstream() {
        let host = Host::new();
        let (producer, promise) = host.pair::<i32, Error>();
        let broken: Promise<i32, Error> = promise.then(|_| -> Result<i32, Error> {
            panic!("handler")
        });
        let seen: Seen<Error> = Seen::default();
        let sink = seen.clone();
        let _: Promise<i32, Error> = broken.catch(move |reason| {
            sink.borrow_mut().push(reason);
            Ok(0)
        });
        producer.resolve(1);
        host.run_until_stalled();
        assert_eq!(*seen.borrow(), vec![Error::Panicked("handler".into())]);
    }

    #[test]
    fn test_producer_resolving_with_own_promise_rejects() {
        let host = Host::new();
        let (producer, promise) = host.pair::<i32, Error>();
        producer.resolve(promise.clone());
        assert_eq!(promise.status(), Status::Rejected);
    }
}
