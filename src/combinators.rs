//! `resolve`, `reject`, `all` and `race`.
//!
//! The aggregate combinators only use `resolve` and `then_catch`; they never
//! reach into another promise's state.

use std::cell::RefCell;
use std::rc::Rc;

use crate::resolver::Resolver;
use crate::thenable::Resolution;
use crate::{Error, Host, Promise};

impl Host {
    /// Wraps `value` in a promise of this host.
    ///
    /// A promise that already belongs to this host is returned as is.
    pub fn resolve<T, E, V>(&self, value: V) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
        V: Into<Resolution<T, E>>,
    {
        match value.into() {
            Resolution::Promise(promise) if promise.host().ptr_eq(self) => promise,
            value => {
                let (producer, promise) = self.pair();
                producer.resolve(value);
                promise
            }
        }
    }

    /// A promise that is already rejected with `reason`.
    pub fn reject<T, E>(&self, reason: E) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
    {
        Promise::from_resolver(Resolver::rejected(self.clone(), reason))
    }

    /// Fulfills with every value, in input order, once all of them fulfilled.
    /// Rejects with the first rejection and ignores everything after it.
    ///
    /// ```
    /// use promise_aplus::{Error, Host, Promise, Resolution};
    /// use std::{cell::RefCell, rc::Rc};
    ///
    /// let host = Host::new();
    /// let two: Promise<i32, Error> = host.resolve(2);
    /// let all: Promise<Vec<i32>, Error> = host.all(vec![Resolution::Value(1), two.into(), Resolution::Value(3)]);
    /// let seen = Rc::new(RefCell::new(Vec::new()));
    /// let sink = seen.clone();
    /// let _: Promise<(), Error> = all.then(move |values| {
    ///     *sink.borrow_mut() = values;
    ///     Ok(())
    /// });
    /// host.run_until_stalled();
    /// assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    /// ```
    pub fn all<T, E, I>(&self, values: I) -> Promise<Vec<T>, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let items: Vec<Promise<T, E>> = values.into_iter().map(|value| self.resolve(value)).collect();
        self.promise(move |producer| {
            if items.is_empty() {
                producer.resolve(Vec::<T>::new());
                return Ok(());
            }

            let gather = Rc::new(RefCell::new(Gather {
                results: vec![None; items.len()],
                remaining: items.len(),
            }));
            for (index, item) in items.iter().enumerate() {
                let (fulfill, gather) = (producer.clone(), gather.clone());
                let reject = producer.clone();
                let _: Promise<(), E> = item.then_catch(
                    move |value| {
                        let done = gather.borrow_mut().fill(index, value);
                        if let Some(values) = done {
                            fulfill.resolve(values);
                        }
                        Ok(())
                    },
                    move |reason| {
                        reject.reject(reason);
                        Ok(())
                    },
                );
            }
            Ok(())
        })
    }

    /// Settles the same way as whichever value settles first.
    pub fn race<T, E, I>(&self, values: I) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        let items: Vec<Promise<T, E>> = values.into_iter().map(|value| self.resolve(value)).collect();
        self.promise(move |producer| {
            for item in &items {
                let (fulfill, reject) = (producer.clone(), producer.clone());
                let _: Promise<(), E> = item.then_catch(
                    move |value| {
                        fulfill.resolve(value);
                        Ok(())
                    },
                    move |reason| {
                        reject.reject(reason);
                        Ok(())
                    },
                );
            }
            Ok(())
        })
    }
}

struct Gather<T> {
    results: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Gather<T> {
    /// Stores one result; returns every value once the last slot is filled.
    fn fill(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        if self.results[index].replace(value).is_none() {
            self.remaining -= 1;
        }
        if self.remaining > 0 {
            return None;
        }
        Some(self.results.drain(..).flatten().collect())
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// [`Host::resolve`] on [`Host::current`].
    pub fn resolve<V: Into<Resolution<T, E>>>(value: V) -> Self {
        Host::current().resolve(value)
    }

    /// [`Host::reject`] on [`Host::current`].
    pub fn reject(reason: E) -> Self {
        Host::current().reject(reason)
    }

    /// [`Host::all`] on [`Host::current`].
    pub fn all<I>(values: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        Host::current().all(values)
    }

    /// [`Host::race`] on [`Host::current`].
    pub fn race<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Resolution<T, E>>,
    {
        Host::current().race(values)
    }
}
