//! One-shot deferred completions.
//!
//! A [`Deferred`] / [`Promise`] pair is a single-use slot: the deferred side
//! is fulfilled exactly once with either a value or a [`StreamError`], and
//! the promise side observes the outcome. Channels hand a `Deferred` to each
//! parked receiver and resolve it from a later `send` or reject it at close.
//!
//! Consumption is either continuation style — [`Promise::on_settle`]
//! schedules the continuation on the promise's target queue — or `await`
//! style through the [`Future`] impl, which uses the task waker directly and
//! never touches the queue.
//!
//! ```text
//!   Deferred ── resolve(v) ──┐
//!            ── reject(e)  ──┤──► settled ──► continuation runs on queue
//!   (drop)  ── reject(ChannelClosed)          (or waker fires)
//! ```

use core::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::StreamError;
use crate::exec::TaskQueue;

/// Result carried by a settled promise.
pub type Settled<T> = Result<T, StreamError>;

enum Continuation<T> {
    Callback(Box<dyn FnOnce(Settled<T>) + Send>),
    Waker(Waker),
}

impl<T> fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Continuation::Callback"),
            Self::Waker(_) => f.write_str("Continuation::Waker"),
        }
    }
}

#[derive(Debug)]
struct PromiseInner<T> {
    /// Outcome, present from settlement until the consumer takes it.
    result: Option<Settled<T>>,
    /// Set at settlement and never cleared; distinguishes "not yet settled"
    /// from "settled and consumed".
    settled: bool,
    continuation: Option<Continuation<T>>,
}

struct PromiseShared<T> {
    state: Mutex<PromiseInner<T>>,
    queue: TaskQueue,
}

impl<T> PromiseShared<T> {
    fn new(queue: TaskQueue) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PromiseInner {
                result: None,
                settled: false,
                continuation: None,
            }),
            queue,
        })
    }

    /// First settlement wins; later settlements are dropped.
    fn settle(&self, outcome: Settled<T>)
    where
        T: Send + 'static,
    {
        let dispatch = {
            let mut state = self.state.lock();
            if state.settled {
                return;
            }
            state.settled = true;
            match state.continuation.take() {
                Some(Continuation::Callback(f)) => Some((f, outcome)),
                Some(Continuation::Waker(waker)) => {
                    state.result = Some(outcome);
                    drop(state);
                    waker.wake();
                    None
                }
                None => {
                    state.result = Some(outcome);
                    None
                }
            }
        };

        if let Some((f, outcome)) = dispatch {
            self.queue.push(move || f(outcome));
        }
    }
}

/// Creates an unsettled completion pair targeting `queue`.
#[must_use]
pub fn deferred<T: Send + 'static>(queue: TaskQueue) -> (Deferred<T>, Promise<T>) {
    let shared = PromiseShared::new(queue);
    (
        Deferred {
            shared: Arc::clone(&shared),
        },
        Promise { shared },
    )
}

/// The fulfilling side of a completion pair.
///
/// Dropping an unsettled `Deferred` rejects the promise with
/// [`StreamError::ChannelClosed`] so a parked consumer is never stranded.
pub struct Deferred<T: Send + 'static> {
    shared: Arc<PromiseShared<T>>,
}

impl<T: Send + 'static> Deferred<T> {
    /// Settles the promise with a value.
    pub fn resolve(self, value: T) {
        self.shared.settle(Ok(value));
    }

    /// Settles the promise with a failure.
    pub fn reject(self, error: StreamError) {
        self.shared.settle(Err(error));
    }
}

impl<T: Send + 'static> Drop for Deferred<T> {
    fn drop(&mut self) {
        self.shared.settle(Err(StreamError::ChannelClosed));
    }
}

impl<T: Send + 'static> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &self.shared.state.lock().settled)
            .finish()
    }
}

/// The observing side of a completion pair.
pub struct Promise<T: Send + 'static> {
    shared: Arc<PromiseShared<T>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Creates a promise already resolved with `value`.
    #[must_use]
    pub fn resolved(queue: TaskQueue, value: T) -> Self {
        let shared = PromiseShared::new(queue);
        shared.settle(Ok(value));
        Self { shared }
    }

    /// Creates a promise already rejected with `error`.
    #[must_use]
    pub fn rejected(queue: TaskQueue, error: StreamError) -> Self {
        let shared = PromiseShared::new(queue);
        shared.settle(Err(error));
        Self { shared }
    }

    /// Registers a continuation to run on the target queue once settled.
    ///
    /// If the promise is already settled the continuation is scheduled
    /// immediately. At most one consumer (continuation or `await`) observes
    /// the outcome.
    pub fn on_settle<F>(self, f: F)
    where
        F: FnOnce(Settled<T>) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if let Some(outcome) = state.result.take() {
            drop(state);
            self.shared.queue.push(move || f(outcome));
        } else {
            debug_assert!(!state.settled, "promise outcome consumed twice");
            state.continuation = Some(Continuation::Callback(Box::new(f)));
        }
    }

    /// Returns true once the deferred side has settled this promise.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.shared.state.lock().settled
    }
}

impl<T: Send + 'static> Future for Promise<T> {
    type Output = Settled<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        if let Some(outcome) = state.result.take() {
            state.continuation = None;
            return Poll::Ready(outcome);
        }
        if state.settled {
            // Outcome already consumed; polling again is a misuse, observed
            // as a closed-channel failure rather than a hang.
            return Poll::Ready(Err(StreamError::ChannelClosed));
        }
        match &state.continuation {
            Some(Continuation::Waker(existing)) if existing.will_wake(cx.waker()) => {}
            _ => state.continuation = Some(Continuation::Waker(cx.waker().clone())),
        }
        Poll::Pending
    }
}

impl<T: Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("settled", &self.shared.state.lock().settled)
            .finish()
    }
}
