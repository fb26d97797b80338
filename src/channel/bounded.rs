//! Promise-bearing bounded SPSC channel with hysteretic backpressure.
//!
//! The channel buffers value tuples up to a high watermark (`buffer_count`)
//! and parks receivers as deferred completions when empty. Two watermarks
//! drive flow control:
//!
//! ```text
//!              send                         receive
//!   producer ───────► [ v v v v v ░ ] ───────────► consumer
//!                        │      │
//!        len == buffer_count    len < resume_count
//!        sets `paused`          clears `paused`, fires the
//!                               resume notification once
//! ```
//!
//! Resuming at the high watermark would thrash a producer that pauses and
//! restarts OS reads; the low watermark (3/4 of capacity, or the capacity
//! itself for buffers under three slots) amortizes the flip.
//!
//! Backpressure is cooperative: `send` never blocks and never drops, so a
//! producer that ignores [`Writable::should_send`] can exceed the watermark.
//! Compliant producers stop at `should_send() == false` and install a resume
//! notification to learn when the consumer has drained the queue.
//!
//! At any instant either the buffered queue or the waiter list is empty: a
//! send finding a parked receiver resolves it directly and never buffers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::StreamError;
use crate::exec::TaskQueue;
use crate::promise::{deferred, Deferred, Promise};
use crate::scope::Scope;

/// Error returned when sending on a closed channel.
///
/// The value is handed back so the producer can retain or reroute it.
#[derive(Debug)]
pub enum SendError<T> {
    /// The channel was closed before the send.
    Closed(T),
}

impl<T> SendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_value(self) -> T {
        match self {
            Self::Closed(value) => value,
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(_) => f.write_str("sending on a closed channel"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

/// Default low watermark for a given capacity.
///
/// Small buffers resume only when fully drained; larger ones at 3/4 of
/// capacity.
const fn default_resume_count(buffer_count: usize) -> usize {
    if buffer_count < 3 {
        buffer_count
    } else {
        buffer_count * 3 / 4
    }
}

/// Resume hook installed by a producer.
///
/// A repeating hook fires on every paused→unpaused transition until replaced;
/// a one-shot hook is consumed by its first firing.
enum ResumeHook {
    Repeating(Arc<dyn Fn() + Send + Sync>),
    Once(Box<dyn FnOnce() + Send>),
}

impl fmt::Debug for ResumeHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repeating(_) => f.write_str("ResumeHook::Repeating"),
            Self::Once(_) => f.write_str("ResumeHook::Once"),
        }
    }
}

/// Takes the hook out for invocation: a repeating hook stays installed, a
/// one-shot hook is consumed.
fn snapshot_hook(slot: &mut Option<ResumeHook>) -> Option<ResumeHook> {
    if matches!(slot, Some(ResumeHook::Once(_))) {
        return slot.take();
    }
    if let Some(ResumeHook::Repeating(f)) = slot {
        return Some(ResumeHook::Repeating(Arc::clone(f)));
    }
    None
}

struct ChannelState<T: Send + 'static> {
    /// Buffered values; non-empty only while `waiters` is empty.
    queue: VecDeque<T>,
    /// Parked receivers; non-empty only while `queue` is empty.
    waiters: VecDeque<Deferred<T>>,
    /// Resources held until close.
    scopes: SmallVec<[Scope; 2]>,
    resume_notification: Option<ResumeHook>,
    /// Cause attached by the first close, observed by later receives.
    close_cause: Option<StreamError>,
}

/// Shared channel core jointly owned by the endpoints.
pub(crate) struct SharedChannel<T: Send + 'static> {
    state: Mutex<ChannelState<T>>,
    self_ref: Weak<SharedChannel<T>>,
    closed: AtomicBool,
    paused: AtomicBool,
    buffer_count: usize,
    resume_count: usize,
    default_queue: TaskQueue,
}

impl<T: Send + 'static> SharedChannel<T> {
    fn new(queue: TaskQueue, buffer_count: usize, resume_count: usize) -> Arc<Self> {
        assert!(buffer_count > 0, "channel capacity must be non-zero");
        Arc::new_cyclic(|self_ref| Self {
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(buffer_count),
                waiters: VecDeque::new(),
                scopes: SmallVec::new(),
                resume_notification: None,
                close_cause: None,
            }),
            self_ref: self_ref.clone(),
            closed: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            buffer_count,
            resume_count: resume_count.clamp(1, buffer_count),
            default_queue: queue,
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn should_send(&self) -> bool {
        !self.paused.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, value: T) -> Result<(), SendError<T>> {
        let handoff = {
            let mut state = self.state.lock();
            if self.closed.load(Ordering::SeqCst) {
                return Err(SendError::Closed(value));
            }
            match state.waiters.pop_front() {
                // A parked receiver takes the value directly; it never
                // touches the buffer.
                Some(waiter) => Some((waiter, value)),
                None => {
                    state.queue.push_back(value);
                    if state.queue.len() >= self.buffer_count {
                        self.paused.store(true, Ordering::SeqCst);
                    }
                    None
                }
            }
        };

        if let Some((waiter, value)) = handoff {
            waiter.resolve(value);
        }
        Ok(())
    }

    fn receive(&self) -> Promise<T> {
        enum Outcome<T: Send + 'static> {
            Value { value: T, drained: bool },
            Rejected(StreamError),
            Parked(Promise<T>),
        }

        let outcome = {
            let mut state = self.state.lock();
            if let Some(value) = state.queue.pop_front() {
                Outcome::Value {
                    value,
                    drained: state.queue.len() < self.resume_count,
                }
            } else if self.closed.load(Ordering::SeqCst) {
                Outcome::Rejected(state.close_cause.unwrap_or(StreamError::ChannelClosed))
            } else {
                let (deferred, promise) = deferred(self.default_queue.clone());
                state.waiters.push_back(deferred);
                Outcome::Parked(promise)
            }
        };

        match outcome {
            Outcome::Value { value, drained } => {
                if drained {
                    // Off the receive path: a resume handler that receives
                    // synchronously must not recurse into this frame.
                    let weak = self.self_ref.clone();
                    self.default_queue.push(move || {
                        if let Some(chan) = weak.upgrade() {
                            chan.resume();
                        }
                    });
                }
                Promise::resolved(self.default_queue.clone(), value)
            }
            Outcome::Rejected(cause) => Promise::rejected(self.default_queue.clone(), cause),
            Outcome::Parked(promise) => {
                // A receiver is parked, so the producer may deliver again.
                self.resume();
                promise
            }
        }
    }

    fn close_with(&self, cause: Option<StreamError>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (waiters, scopes, notification, cause) = {
            let mut state = self.state.lock();
            if state.close_cause.is_none() {
                state.close_cause = cause;
            }
            let cause = state.close_cause.unwrap_or(StreamError::ChannelClosed);
            let waiters = std::mem::take(&mut state.waiters);
            let scopes = std::mem::take(&mut state.scopes);
            let notification = snapshot_hook(&mut state.resume_notification);
            (waiters, scopes, notification, cause)
        };

        // The closed flag is already visible, so no new waiter can appear;
        // rejections and the notification run without the lock.
        for waiter in waiters {
            waiter.reject(cause);
        }
        drop(scopes);
        match notification {
            Some(ResumeHook::Repeating(f)) => f(),
            Some(ResumeHook::Once(f)) => f(),
            None => {}
        }
    }

    /// Clears `paused` and fires the resume notification on a true
    /// paused→unpaused transition. Fires at most once per transition.
    fn resume(&self) {
        let hook = {
            let mut state = self.state.lock();
            if !self.paused.swap(false, Ordering::SeqCst) {
                return;
            }
            snapshot_hook(&mut state.resume_notification)
        };
        match hook {
            Some(ResumeHook::Repeating(f)) => f(),
            Some(ResumeHook::Once(f)) => f(),
            None => {}
        }
    }

    fn set_resume_notification(&self, hook: Option<ResumeHook>) {
        self.state.lock().resume_notification = hook;
    }

    fn add_scope_until_closed(&self, scope: Scope) {
        let mut state = self.state.lock();
        if self.closed.load(Ordering::SeqCst) {
            // Already closed: release immediately instead of retaining.
            return;
        }
        state.scopes.push(scope);
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl<T: Send + 'static> fmt::Debug for SharedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedChannel")
            .field("closed", &self.is_closed())
            .field("paused", &self.paused.load(Ordering::SeqCst))
            .field("buffer_count", &self.buffer_count)
            .field("resume_count", &self.resume_count)
            .finish_non_exhaustive()
    }
}

/// Closes the channel when the last endpoint handle of one side drops.
struct SideOwner<T: Send + 'static>(Arc<SharedChannel<T>>);

impl<T: Send + 'static> Drop for SideOwner<T> {
    fn drop(&mut self) {
        self.0.close_with(None);
    }
}

/// Consumer endpoint of a bounded channel.
///
/// Clones share one side owner: the channel closes when the last readable
/// clone drops, and closing any clone closes the whole channel.
pub struct Readable<T: Send + 'static> {
    shared: Arc<SharedChannel<T>>,
    _owner: Arc<SideOwner<T>>,
}

impl<T: Send + 'static> Readable<T> {
    /// Receives the next value.
    ///
    /// Resolves immediately when a value is buffered; rejects immediately
    /// when the channel is closed and drained (with the attached cause, or
    /// [`StreamError::ChannelClosed`] if none); otherwise parks until a later
    /// send, close, or failure settles it.
    #[must_use]
    pub fn receive(&self) -> Promise<T> {
        self.shared.receive()
    }

    /// Returns true once the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Closes the whole channel. Idempotent.
    pub fn close(&self) {
        self.shared.close_with(None);
    }

    /// Closes the whole channel with an attached cause. Idempotent; only the
    /// first close attaches its cause.
    pub fn close_with(&self, cause: StreamError) {
        self.shared.close_with(Some(cause));
    }

    /// Ties a resource's lifetime to the channel; released on close.
    pub fn add_scope_until_closed(&self, scope: Scope) {
        self.shared.add_scope_until_closed(scope);
    }

    /// Returns the executor queue receive continuations are scheduled on.
    #[must_use]
    pub fn queue(&self) -> TaskQueue {
        self.shared.default_queue.clone()
    }
}

impl<T: Send + 'static> Clone for Readable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _owner: Arc::clone(&self._owner),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Readable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readable")
            .field("channel", &self.shared)
            .finish()
    }
}

/// Producer endpoint of a bounded channel.
///
/// Clones share one side owner: the channel closes when the last writable
/// clone drops.
pub struct Writable<T: Send + 'static> {
    shared: Arc<SharedChannel<T>>,
    _owner: Arc<SideOwner<T>>,
}

impl<T: Send + 'static> Writable<T> {
    /// Sends a value.
    ///
    /// Resolves a parked receiver directly when one exists, otherwise
    /// buffers. Never blocks; on a full buffer the channel flips to paused
    /// and a cooperative producer stops at [`should_send`](Self::should_send).
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] with the value when the channel was
    /// closed before the send.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        self.shared.send(value)
    }

    /// Stale but monotone hint: false once the channel is paused or closed.
    #[must_use]
    pub fn should_send(&self) -> bool {
        self.shared.should_send()
    }

    /// Installs a resume notification fired on every paused→unpaused
    /// transition until replaced. The call itself never invokes the hook.
    pub fn set_resume_notification<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared
            .set_resume_notification(Some(ResumeHook::Repeating(Arc::new(f))));
    }

    /// Installs a one-shot resume notification consumed by its first firing.
    pub fn set_resume_notification_once<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared
            .set_resume_notification(Some(ResumeHook::Once(Box::new(f))));
    }

    /// Removes any installed resume notification.
    pub fn clear_resume_notification(&self) {
        self.shared.set_resume_notification(None);
    }

    /// Returns true once the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Closes the whole channel. Idempotent.
    pub fn close(&self) {
        self.shared.close_with(None);
    }

    /// Closes the whole channel with an attached cause. Idempotent; only the
    /// first close attaches its cause.
    pub fn close_with(&self, cause: StreamError) {
        self.shared.close_with(Some(cause));
    }

    /// Ties a resource's lifetime to the channel; released on close.
    pub fn add_scope_until_closed(&self, scope: Scope) {
        self.shared.add_scope_until_closed(scope);
    }
}

impl<T: Send + 'static> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _owner: Arc::clone(&self._owner),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writable")
            .field("channel", &self.shared)
            .finish()
    }
}

/// A bounded channel and its two endpoints.
#[derive(Debug)]
pub struct Channel<T: Send + 'static> {
    shared: Arc<SharedChannel<T>>,
    readable: Readable<T>,
    writable: Writable<T>,
}

impl<T: Send + 'static> Channel<T> {
    /// Creates a channel with the default low watermark for `buffer_count`.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_count` is zero.
    #[must_use]
    pub fn new(queue: TaskQueue, buffer_count: usize) -> Self {
        Self::with_resume_count(queue, buffer_count, default_resume_count(buffer_count))
    }

    /// Creates a channel with explicit watermarks. `resume_count` is clamped
    /// to `1..=buffer_count`.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_count` is zero.
    #[must_use]
    pub fn with_resume_count(queue: TaskQueue, buffer_count: usize, resume_count: usize) -> Self {
        let shared = SharedChannel::new(queue, buffer_count, resume_count);
        let readable = Readable {
            shared: Arc::clone(&shared),
            _owner: Arc::new(SideOwner(Arc::clone(&shared))),
        };
        let writable = Writable {
            shared: Arc::clone(&shared),
            _owner: Arc::new(SideOwner(Arc::clone(&shared))),
        };
        Self {
            shared,
            readable,
            writable,
        }
    }

    /// Returns a consumer endpoint.
    #[must_use]
    pub fn readable(&self) -> Readable<T> {
        self.readable.clone()
    }

    /// Returns a producer endpoint.
    #[must_use]
    pub fn writable(&self) -> Writable<T> {
        self.writable.clone()
    }

    /// Ties a resource's lifetime to the channel; released on close.
    pub fn add_scope_until_closed(&self, scope: Scope) {
        self.shared.add_scope_until_closed(scope);
    }

    /// Splits the channel into its endpoints, dropping the construction
    /// handle.
    #[must_use]
    pub fn into_parts(self) -> (Readable<T>, Writable<T>) {
        (self.readable, self.writable)
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.shared.queue_len()
    }
}
