//! The promise factory.
//!
//! A [`Host`] decides how promises it creates schedule their notifications.
//! Every promise remembers the host that made it, and `then`, `catch` and the
//! combinators build their results with that same host, so promises from a
//! customised host keep composing with each other.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::scheduler::{MicrotaskQueue, Schedule, Task};

thread_local! {
    static GLOBAL: RefCell<Option<Host>> = const { RefCell::new(None) };
    static FALLBACK: Host = Host::builder().name("fallback").build();
}

#[derive(Clone)]
pub struct Host {
    inner: Rc<Inner>,
}

struct Inner {
    name: String,
    scheduler: Rc<dyn Schedule>,
    drain_budget: Option<usize>,
}

/// Configures a [`Host`].
///
/// ```
/// use futures::executor::LocalPool;
/// use promise_aplus::Host;
///
/// let pool = LocalPool::new();
/// let host = Host::builder()
///     .name("pool")
///     .scheduler(pool.spawner())
///     .build();
/// assert_eq!(host.name(), "pool");
/// ```
pub struct Builder {
    name: String,
    scheduler: Option<Rc<dyn Schedule>>,
    drain_budget: Option<usize>,
}

impl Builder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Scheduler used for notifications. Defaults to a fresh [`MicrotaskQueue`].
    pub fn scheduler(mut self, scheduler: impl Schedule + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    /// Caps how many tasks a single [`Host::run_until_stalled`] call runs.
    pub fn drain_budget(mut self, budget: usize) -> Self {
        self.drain_budget = Some(budget);
        self
    }

    pub fn build(self) -> Host {
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Rc::new(MicrotaskQueue::new()));
        Host {
            inner: Rc::new(Inner {
                name: self.name,
                scheduler,
                drain_budget: self.drain_budget,
            }),
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            name: "host".to_owned(),
            scheduler: None,
            drain_budget: None,
        }
    }
}

impl Host {
    /// A host with its own microtask queue.
    pub fn new() -> Host {
        Host::builder().build()
    }

    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether both handles are the same factory.
    pub fn ptr_eq(&self, other: &Host) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs `task` asynchronously, as soon as the scheduler allows.
    pub fn asap(&self, task: impl FnOnce() + 'static) {
        self.schedule(Box::new(task));
    }

    pub(crate) fn schedule(&self, task: Task) {
        trace!(host = %self.inner.name, "scheduling notification");
        self.inner.scheduler.schedule(task);
    }

    /// Drains the scheduler on the calling thread and returns how many tasks
    /// ran. Hosts backed by an executor pool return 0; drive the pool instead.
    pub fn run_until_stalled(&self) -> usize {
        let ran = self.inner.scheduler.drain(self.inner.drain_budget);
        if self.inner.drain_budget == Some(ran) {
            let pending = self.pending();
            if pending > 0 {
                warn!(host = %self.inner.name, ran, pending, "drain budget exhausted");
            } else {
                trace!(host = %self.inner.name, ran, "drained exactly the budget");
            }
        }
        ran
    }

    /// Notifications waiting in the scheduler. Always 0 for schedulers that
    /// are driven elsewhere.
    pub fn pending(&self) -> usize {
        self.inner.scheduler.pending()
    }

    /// The thread's global host, if one was installed.
    pub fn global() -> Option<Host> {
        GLOBAL.with(|global| global.borrow().clone())
    }

    /// Installs this host as the thread's global factory unless one already
    /// exists, in which case `self` is handed back untouched.
    pub fn install_global(self) -> Result<(), Host> {
        GLOBAL.with(|global| {
            let mut global = global.borrow_mut();
            if global.is_some() {
                debug!(host = %self.inner.name, "global host already installed");
                return Err(self);
            }
            debug!(host = %self.inner.name, "installing global host");
            *global = Some(self);
            Ok(())
        })
    }

    /// Removes and returns the thread's global host.
    pub fn take_global() -> Option<Host> {
        GLOBAL.with(|global| global.borrow_mut().take())
    }

    /// The host used by [`Promise::new`](crate::Promise::new) and the other
    /// host-less constructors: the global one if installed, otherwise a
    /// per-thread fallback with its own microtask queue.
    pub fn current() -> Host {
        Host::global().unwrap_or_else(|| FALLBACK.with(Host::clone))
    }
}

impl Default for Host {
    fn default() -> Self {
        Host::new()
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.inner.name)
            .field("drain_budget", &self.inner.drain_budget)
            .finish()
    }
}

/// Installs a default host as the thread's global promise factory when none is
/// present, and returns whichever host is global afterwards.
///
/// Nothing is installed implicitly; until this (or [`Host::install_global`])
/// runs, host-less constructors use a private per-thread fallback.
pub fn install_global_promise() -> Host {
    if let Some(host) = Host::global() {
        return host;
    }
    let host = Host::builder().name("global").build();
    match host.clone().install_global() {
        Ok(()) => host,
        Err(existing) => existing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_install_global_promise_is_idempotent() {
        assert!(Host::global().is_none());
        let first = install_global_promise();
        let second = install_global_promise();
        assert!(first.ptr_eq(&second));
        assert!(Host::current().ptr_eq(&first));
        assert!(Host::take_global().is_some());
        assert!(Host::global().is_none());
    }

    #[test]
    fn test_install_global_does_not_replace_existing() {
        let mine = Host::builder().name("mine").build();
        mine.clone().install_global().unwrap();
        let other = Host::builder().name("other").build();
        let rejected = other.install_global().unwrap_err();
        assert_eq!(rejected.name(), "other");
        assert!(install_global_promise().ptr_eq(&mine));
        Host::take_global();
    }

    #[test]
    fn test_current_falls_back_per_thread() {
        assert!(Host::global().is_none());
        let a = Host::current();
        let b = Host::current();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.name(), "fallback");
    }

    #[test]
    fn test_asap_defers_until_drained() {
        let host = Host::new();
        let hit = Rc::new(Cell::new(false));
        let flag = hit.clone();
        host.asap(move || flag.set(true));
        assert!(!hit.get());
        assert_eq!(host.run_until_stalled(), 1);
        assert!(hit.get());
    }

    #[test]
    fn test_drain_budget_limits_run() {
        let host = Host::builder().drain_budget(1).build();
        host.asap(|| {});
        host.asap(|| {});
        assert_eq!(host.pending(), 2);
        assert_eq!(host.run_until_stalled(), 1);
        assert_eq!(host.pending(), 1);
        assert_eq!(host.run_until_stalled(), 1);
        // The budget was used up exactly, but nothing is left behind.
        assert_eq!(host.pending(), 0);
        assert_eq!(host.run_until_stalled(), 0);
    }

    #[test]
    fn test_pending_is_zero_for_pool_schedulers() {
        let pool = futures::executor::LocalPool::new();
        let host = Host::builder().drain_budget(1).scheduler(pool.spawner()).build();
        host.asap(|| {});
        assert_eq!(host.pending(), 0);
        assert_eq!(host.run_until_stalled(), 0);
    }
}
