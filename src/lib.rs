//! Promises/A+ promises for rust.
//!
//! A [`Promise`] settles exactly once, delivers its value to every handler in
//! registration order and never calls a handler inside the call that
//! registered it. Resolving with another promise, or with any foreign
//! [`Thenable`], adopts that thenable's eventual outcome.
//!
//! Promises are single-threaded. Notifications go through the [`Host`] that
//! created a promise; by default that is a [`MicrotaskQueue`] the owner
//! drains with [`Host::run_until_stalled`].
//!
//! ```
//! use promise_aplus::{Error, Host, Promise};
//! use std::{cell::Cell, rc::Rc};
//!
//! let host = Host::new();
//! let start: Promise<i32, Error> = host.resolve(21);
//! let seen = Rc::new(Cell::new(0));
//! let sink = seen.clone();
//! let doubler = host.clone();
//! let _: Promise<(), Error> = start
//!     .then(move |v| Ok(doubler.resolve(v * 2)))
//!     .then(move |v: i32| {
//!         sink.set(v);
//!         Ok(())
//!     });
//! assert_eq!(seen.get(), 0);
//! host.run_until_stalled();
//! assert_eq!(seen.get(), 42);
//! ```

use std::panic::{self, AssertUnwindSafe};

mod combinators;
mod consumer;
mod host;
mod promise;
mod resolver;
mod scheduler;
mod thenable;

pub use consumer::Consumer;
pub use host::{install_global_promise, Builder, Host};
pub use promise::{Producer, Promise};
pub use resolver::Status;
pub use scheduler::{MicrotaskQueue, Schedule, Task};
pub use thenable::{Capability, OnFulfilled, OnRejected, Resolution, Thenable};

/// Rejection reasons produced by the crate itself.
///
/// Reason types used with [`Promise`] absorb these through `From<Error>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Chaining cycle detected for promise")]
    ChainingCycle,
    #[error("Promise callback panicked: {0}")]
    Panicked(String),
}

/// Runs `f`, turning a panic into [`Error::Panicked`].
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, Error> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Error::Panicked(message)
    })
}
