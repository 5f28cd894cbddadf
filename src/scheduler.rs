//! The asynchronous notification hook.
//!
//! Settled promises never call their subscribers inline. Every notification is
//! handed to a [`Schedule`] implementation which runs it "soon": after the
//! current call stack unwinds and before anything the host queues later.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use futures::executor::LocalSpawner;
use futures::task::LocalSpawnExt;
use tracing::{trace, warn};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Something that can run a [`Task`] asynchronously, as soon as possible.
pub trait Schedule {
    /// Queues `task`. Must not run it before returning.
    fn schedule(&self, task: Task);

    /// Runs queued work on the calling thread, at most `budget` tasks when one
    /// is given, and returns how many tasks ran.
    ///
    /// Schedulers driven by someone else (an executor pool, say) run nothing
    /// here.
    fn drain(&self, budget: Option<usize>) -> usize {
        let _ = budget;
        0
    }

    /// Tasks queued but not run yet, as far as this scheduler can tell.
    fn pending(&self) -> usize {
        0
    }
}

/// A FIFO microtask queue drained explicitly by its owner.
///
/// Tasks queued while draining run in the same drain, after the ones already
/// waiting.
#[derive(Clone, Default)]
pub struct MicrotaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Runs tasks until the queue is empty.
    pub fn run_until_stalled(&self) -> usize {
        self.drain(None)
    }
}

impl Schedule for MicrotaskQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }

    fn drain(&self, budget: Option<usize>) -> usize {
        let mut ran = 0;
        while budget.map_or(true, |budget| ran < budget) {
            // The borrow ends with this statement so tasks may queue more work.
            let next = self.tasks.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        trace!(ran, pending = self.len(), "drained microtasks");
        ran
    }

    fn pending(&self) -> usize {
        self.len()
    }
}

impl std::fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrotaskQueue").field("len", &self.len()).finish()
    }
}

/// Spawns each task onto a `futures` [`LocalPool`](futures::executor::LocalPool);
/// tasks run whenever the pool is driven.
impl Schedule for LocalSpawner {
    fn schedule(&self, task: Task) {
        if let Err(err) = self.spawn_local(async move { task() }) {
            warn!(%err, "local pool is gone, dropping notification");
        }
    }
}
