//! Structural "thenable" support.
//!
//! Anything exposing a callable `then(on_fulfilled, on_rejected)` can be
//! adopted by a promise, not just this crate's own [`Promise`]. Foreign types
//! opt in by implementing [`Thenable`]; adoption first probes the capability
//! and only then calls `then`.

use std::fmt;
use std::rc::Rc;

use crate::Promise;

/// Callback handed to [`Thenable::then`] for the fulfillment side.
///
/// The value passed in is itself a [`Resolution`], so a thenable may fulfill
/// with yet another thenable and adoption keeps unwrapping.
pub type OnFulfilled<T, E> = Box<dyn FnOnce(Resolution<T, E>)>;

/// Callback handed to [`Thenable::then`] for the rejection side.
pub type OnRejected<E> = Box<dyn FnOnce(E)>;

/// Outcome of probing a thenable for its `then` capability.
pub enum Capability<T> {
    /// `then` is callable; adoption calls it.
    Then,
    /// `then` is absent or not callable; the object is taken as a plain value.
    Plain(T),
}

/// A promise-like object that can be adopted by [`Promise`].
///
/// Callbacks may be invoked synchronously or later, and a misbehaving
/// implementation may invoke both of them: adoption only honours the first.
///
/// ```
/// use promise_aplus::{Error, Host, OnFulfilled, OnRejected, Promise, Resolution, Thenable};
///
/// struct Ready(i32);
///
/// impl Thenable<i32, Error> for Ready {
///     fn then(&self, on_fulfilled: OnFulfilled<i32, Error>, _: OnRejected<Error>) -> Result<(), Error> {
///         on_fulfilled(Resolution::Value(self.0));
///         Ok(())
///     }
/// }
///
/// let host = Host::new();
/// let promise: Promise<i32, Error> = host.resolve(Resolution::thenable(Ready(7)));
/// let seen = std::rc::Rc::new(std::cell::Cell::new(0));
/// let sink = seen.clone();
/// let _: Promise<(), Error> = promise.then(move |v| {
///     sink.set(v);
///     Ok(())
/// });
/// host.run_until_stalled();
/// assert_eq!(seen.get(), 7);
/// ```
pub trait Thenable<T, E> {
    /// Looks up the `then` capability. An `Err` here rejects the adopting
    /// promise, the same as a throwing property read.
    fn capability(&self) -> Result<Capability<T>, E> {
        Ok(Capability::Then)
    }

    /// Subscribes to the eventual outcome. Returning `Err` rejects the adopting
    /// promise unless one of the callbacks already ran.
    fn then(&self, on_fulfilled: OnFulfilled<T, E>, on_rejected: OnRejected<E>) -> Result<(), E>;
}

/// What a promise gets resolved with.
pub enum Resolution<T, E> {
    /// A plain value; fulfills right away.
    Value(T),
    /// A promise of this crate; its outcome is adopted.
    Promise(Promise<T, E>),
    /// A foreign thenable; its outcome is adopted.
    Thenable(Rc<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable(thenable: impl Thenable<T, E> + 'static) -> Self {
        Resolution::Thenable(Rc::new(thenable))
    }
}

impl<T: Clone, E> Clone for Resolution<T, E> {
    fn clone(&self) -> Self {
        match self {
            Resolution::Value(value) => Resolution::Value(value.clone()),
            Resolution::Promise(promise) => Resolution::Promise(promise.clone()),
            Resolution::Thenable(thenable) => Resolution::Thenable(thenable.clone()),
        }
    }
}

impl<T, E> From<T> for Resolution<T, E> {
    fn from(value: T) -> Self {
        Resolution::Value(value)
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(&promise.status()).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}
