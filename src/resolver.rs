//! The settlement state machine behind every [`Promise`](crate::Promise).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::thenable::{Capability, OnFulfilled, OnRejected, Resolution, Thenable};
use crate::{catch_panic, Error, Host};

pub(crate) type Callback<V> = Box<dyn FnOnce(V)>;

/// Observable state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    /// Resolved with a thenable whose outcome has not been adopted yet.
    Accepted,
    Fulfilled,
    Rejected,
}

impl Status {
    /// Fulfilled or rejected; nothing can change any more.
    pub fn is_settled(self) -> bool {
        matches!(self, Status::Fulfilled | Status::Rejected)
    }
}

enum State<T, E> {
    Pending,
    Accepted(Resolution<T, E>),
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    fn status(&self) -> Status {
        match self {
            State::Pending => Status::Pending,
            State::Accepted(_) => Status::Accepted,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }

    fn is_open(&self) -> bool {
        !self.status().is_settled()
    }
}

struct Inner<T, E> {
    host: Host,
    state: State<T, E>,
    // `None` once the queue can never fire again.
    callbacks: Option<Vec<Callback<T>>>,
    errbacks: Option<Vec<Callback<E>>>,
    unwrapping: bool,
}

impl<T, E> Inner<T, E> {
    fn has_subscribers(&self) -> bool {
        self.callbacks.as_ref().map_or(false, |c| !c.is_empty())
            || self.errbacks.as_ref().map_or(false, |e| !e.is_empty())
    }
}

/// Shared handle to one promise's state. Clones refer to the same state.
///
/// No borrow of the inner cell is ever held while user code, a foreign
/// thenable or the scheduler runs.
pub(crate) struct Resolver<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Resolver {
            inner: self.inner.clone(),
        }
    }
}

/// One-shot guard shared by the two callbacks handed to a thenable.
#[derive(Clone, Default)]
struct Latch(Rc<Cell<bool>>);

impl Latch {
    /// Returns `true` exactly once.
    fn trip(&self) -> bool {
        !self.0.replace(true)
    }
}

impl<T, E> Resolver<T, E> {
    pub(crate) fn host(&self) -> Host {
        self.inner.borrow().host.clone()
    }

    pub(crate) fn status(&self) -> Status {
        self.inner.borrow().state.status()
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub(crate) fn new(host: Host) -> Self {
        Self::with_state(host, State::Pending)
    }

    /// Starts out rejected, skipping the pending machinery entirely.
    pub(crate) fn rejected(host: Host, reason: E) -> Self {
        Self::with_state(host, State::Rejected(reason))
    }

    fn with_state(host: Host, state: State<T, E>) -> Self {
        Resolver {
            inner: Rc::new(RefCell::new(Inner {
                host,
                state,
                callbacks: Some(Vec::new()),
                errbacks: Some(Vec::new()),
                unwrapping: false,
            })),
        }
    }

    /// Resolves with `value`. Plain values fulfill at once; thenables are
    /// adopted as soon as somebody subscribes. Only the first call while
    /// pending has any effect.
    pub(crate) fn resolve(&self, value: Resolution<T, E>) {
        let unwrap_now = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                debug!(status = ?inner.state.status(), "ignoring resolve of a resolved promise");
                return;
            }
            match value {
                Resolution::Value(value) => {
                    drop(inner);
                    self.fulfill(value);
                    return;
                }
                Resolution::Promise(ref promise) if promise.resolver().ptr_eq(self) => {
                    drop(inner);
                    debug!("promise resolved with itself");
                    self.reject(Error::ChainingCycle.into());
                    return;
                }
                value => {
                    inner.state = State::Accepted(value);
                    inner.has_subscribers()
                }
            }
        };
        if unwrap_now {
            self.unwrap_accepted();
        }
    }

    /// Starts adopting the accepted thenable, once.
    fn unwrap_accepted(&self) {
        let value = {
            let mut inner = self.inner.borrow_mut();
            if inner.unwrapping {
                return;
            }
            let value = match &inner.state {
                State::Accepted(value) => value.clone(),
                _ => return,
            };
            inner.unwrapping = true;
            value
        };
        self.adopt(value);
    }

    /// Follows `value` down to a plain value or a rejection.
    fn adopt(&self, value: Resolution<T, E>) {
        let (thenable, deferred): (Rc<dyn Thenable<T, E>>, bool) = match value {
            Resolution::Value(value) => return self.fulfill(value),
            Resolution::Promise(promise) if promise.resolver().ptr_eq(self) => {
                debug!("promise adopts itself");
                return self.reject(Error::ChainingCycle.into());
            }
            // Subscribing to an accepted promise starts its own adoption, so
            // chains of them are followed one scheduler turn per link.
            Resolution::Promise(promise) => {
                let deferred = promise.status() == Status::Accepted;
                let thenable: Rc<dyn Thenable<T, E>> = Rc::new(promise);
                (thenable, deferred)
            }
            Resolution::Thenable(thenable) => (thenable, false),
        };

        match catch_panic(|| thenable.capability()) {
            Ok(Ok(Capability::Then)) => {}
            Ok(Ok(Capability::Plain(value))) => return self.fulfill(value),
            Ok(Err(reason)) => return self.reject(reason),
            Err(panic) => return self.reject(panic.into()),
        }

        if deferred {
            let resolver = self.clone();
            self.host().asap(move || resolver.follow(thenable));
        } else {
            self.follow(thenable);
        }
    }

    /// Calls `thenable.then` with callbacks of which only the first call counts.
    fn follow(&self, thenable: Rc<dyn Thenable<T, E>>) {
        let latch = Latch::default();
        let on_fulfilled: OnFulfilled<T, E> = {
            let (resolver, latch) = (self.clone(), latch.clone());
            Box::new(move |value| {
                if latch.trip() {
                    resolver.adopt(value);
                }
            })
        };
        let on_rejected: OnRejected<E> = {
            let (resolver, latch) = (self.clone(), latch.clone());
            Box::new(move |reason| {
                if latch.trip() {
                    resolver.reject(reason);
                }
            })
        };

        let reason = match catch_panic(|| thenable.then(on_fulfilled, on_rejected)) {
            Ok(Ok(())) => return,
            Ok(Err(reason)) => reason,
            Err(panic) => panic.into(),
        };
        if latch.trip() {
            self.reject(reason);
        } else {
            trace!("thenable failed after settling, ignored");
        }
    }

    pub(crate) fn fulfill(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.state.is_open() {
                debug!(status = ?inner.state.status(), "ignoring fulfill of a settled promise");
                return;
            }
            inner.state = State::Fulfilled(value);
        }
        trace!("promise fulfilled");
        self.flush();
    }

    pub(crate) fn reject(&self, reason: E) {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.state.is_open() {
                debug!(status = ?inner.state.status(), "ignoring reject of a settled promise");
                return;
            }
            inner.state = State::Rejected(reason);
        }
        trace!("promise rejected");
        self.flush();
    }

    /// Registers a callback pair. Late subscribers to a settled promise are
    /// notified with the settled result; nothing runs synchronously.
    pub(crate) fn add_callbacks(&self, on_fulfilled: Callback<T>, on_rejected: Callback<E>) {
        let status = {
            let mut inner = self.inner.borrow_mut();
            if let Some(callbacks) = inner.callbacks.as_mut() {
                callbacks.push(on_fulfilled);
            }
            if let Some(errbacks) = inner.errbacks.as_mut() {
                errbacks.push(on_rejected);
            }
            inner.state.status()
        };
        match status {
            Status::Pending => {}
            Status::Accepted => self.unwrap_accepted(),
            Status::Fulfilled | Status::Rejected => self.flush(),
        }
    }

    /// Hands every queued subscriber of the settled side to the scheduler and
    /// empties the queues, so each callback fires exactly once.
    fn flush(&self) {
        let mut inner = self.inner.borrow_mut();
        let settled = match &inner.state {
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(reason) => Err(reason.clone()),
            State::Pending | State::Accepted(_) => return,
        };
        let host = inner.host.clone();
        match settled {
            Ok(value) => {
                let subs = inner.callbacks.replace(Vec::new()).unwrap_or_default();
                inner.errbacks = None;
                drop(inner);
                notify(&host, subs, value);
            }
            Err(reason) => {
                let subs = inner.errbacks.replace(Vec::new()).unwrap_or_default();
                inner.callbacks = None;
                drop(inner);
                notify(&host, subs, reason);
            }
        }
    }
}

fn notify<V: Clone + 'static>(host: &Host, subs: Vec<Callback<V>>, result: V) {
    if subs.is_empty() {
        return;
    }
    trace!(subscribers = subs.len(), "notifying subscribers");
    host.schedule(Box::new(move || {
        for sub in subs {
            sub(result.clone());
        }
    }));
}
