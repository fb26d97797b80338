//! Executor queues.
//!
//! The streaming core never spawns threads of its own. Every continuation it
//! needs to run — promise resolutions, resume notifications scheduled off the
//! receive path, the outbound pump — is pushed onto a [`TaskQueue`] supplied
//! by the embedding runtime. The reactor hands the socket adapter two queues:
//! an internal queue drained on the reactor thread and a user queue drained
//! by worker threads.
//!
//! [`ManualExecutor`] is the deterministic implementation used by the lab
//! reactor and the test suites: tasks accumulate until the test drains them
//! explicitly, so interleavings are reproducible.

use core::fmt;
use std::sync::Arc;

use crossbeam_queue::SegQueue;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Sink for deferred work, implemented by the embedding executor.
pub trait Schedule: Send + Sync {
    /// Enqueues a task for later execution.
    fn schedule(&self, task: Task);
}

/// Cloneable handle to an executor queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<dyn Schedule>,
}

impl TaskQueue {
    /// Wraps an executor in a queue handle.
    #[must_use]
    pub fn new(inner: Arc<dyn Schedule>) -> Self {
        Self { inner }
    }

    /// Enqueues a closure on the underlying executor.
    pub fn push<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.schedule(Box::new(f));
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").finish_non_exhaustive()
    }
}

/// Deterministic drain-on-demand executor.
///
/// Tasks are held in a lock-free queue and run only when the owner calls
/// [`run_one`](Self::run_one) or [`run_until_idle`](Self::run_until_idle).
/// Tasks scheduled while draining are picked up in the same drain.
pub struct ManualExecutor {
    tasks: SegQueue<Task>,
}

impl ManualExecutor {
    /// Creates an executor with an empty run queue.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: SegQueue::new(),
        })
    }

    /// Returns a queue handle scheduling onto this executor.
    #[must_use]
    pub fn queue(self: &Arc<Self>) -> TaskQueue {
        TaskQueue::new(Arc::clone(self) as Arc<dyn Schedule>)
    }

    /// Runs the oldest pending task, if any. Returns whether one ran.
    pub fn run_one(&self) -> bool {
        match self.tasks.pop() {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks until the queue is empty, including tasks scheduled by the
    /// tasks themselves. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Returns the number of tasks currently queued.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}

impl Schedule for ManualExecutor {
    fn schedule(&self, task: Task) {
        self.tasks.push(task);
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.tasks.len())
            .finish()
    }
}
