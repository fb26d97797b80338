//! Reactor contract consumed by the stream socket adapter.
//!
//! The event loop itself lives outside this crate. What the adapter relies on
//! is a narrow, trait-shaped contract around one attached OS stream:
//!
//! - [`StreamHandle`] — operations the adapter issues against the handle
//!   (start/stop reading, submit a write, initiate close), implemented by the
//!   reactor.
//! - [`StreamEvents`] — callbacks the reactor invokes against the adapter
//!   (buffer allocation, read completion, write completion, close
//!   completion), implemented by the adapter.
//!
//! All `StreamEvents` callbacks for one handle are invoked on a single
//! reactor thread and never concurrently with each other. The handle keeps
//! its installed `StreamEvents` reference alive until after
//! [`StreamEvents::close_complete`] returns, and invokes no callback
//! afterwards; that reference is what lets the adapter's keep-alive scheme
//! guarantee the socket outlives every in-flight callback.
//!
//! The reactor also supplies the two executor queues the adapter wires into
//! its channels: an internal queue drained on the reactor thread and a user
//! queue drained by worker threads.
//!
//! [`lab`] provides a deterministic in-process implementation of the handle
//! side for tests.

pub mod lab;

use std::sync::Arc;

use crate::bytes::ByteBlock;
use crate::exec::TaskQueue;

/// Identity of an in-flight write request.
///
/// Assigned by the adapter at submission and echoed back by the write
/// completion; the adapter uses it to locate the descriptor keeping the
/// buffer alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteId(pub u64);

/// Outcome of an OS read, delivered with the buffer that was allocated for
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The given number of leading bytes of the buffer were filled.
    Data(usize),
    /// Clean end of stream; the buffer was not used.
    Eof,
    /// OS error (negative return code); the buffer was not used.
    Error(i32),
}

/// Status of a completed OS write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The write was fully submitted to the OS.
    Ok,
    /// The write failed with a (negative) OS return code.
    Error(i32),
}

/// Callbacks the reactor invokes against an attached stream.
pub trait StreamEvents: Send + Sync {
    /// Requests a read buffer of at least `suggested_size` bytes.
    fn alloc(&self, suggested_size: usize) -> Vec<u8>;

    /// Delivers the outcome of a read together with the buffer previously
    /// returned by [`alloc`](Self::alloc). Ownership of the buffer transfers
    /// back to the adapter, which discards it on EOF or error.
    fn read_complete(&self, outcome: ReadOutcome, buf: Vec<u8>);

    /// Delivers the completion of a write submitted through
    /// [`StreamHandle::submit_write`].
    fn write_complete(&self, id: WriteId, status: WriteStatus);

    /// Acknowledges that the OS handle is fully closed. Invoked exactly once,
    /// after [`StreamHandle::begin_close`]; no callback follows it.
    fn close_complete(&self);
}

/// Operations an attached stream handle offers to the adapter.
pub trait StreamHandle: Send + Sync {
    /// Installs the callback target. Called once, before any other
    /// operation.
    fn install(&self, events: Arc<dyn StreamEvents>);

    /// Starts (or restarts) OS reads; each read allocates through
    /// [`StreamEvents::alloc`] and completes through
    /// [`StreamEvents::read_complete`].
    fn start_read(&self);

    /// Halts OS reads. Reads already completed may still be delivered.
    fn stop_read(&self);

    /// Submits an OS write of the block's bytes. The handle may hold the
    /// block until the matching [`StreamEvents::write_complete`] fires.
    fn submit_write(&self, id: WriteId, block: Arc<ByteBlock>);

    /// Initiates asynchronous close of the OS handle, eventually
    /// acknowledged through [`StreamEvents::close_complete`].
    fn begin_close(&self);
}

/// Executor queues supplied by the reactor to an attaching socket.
#[derive(Debug, Clone)]
pub struct ReactorContext {
    /// Queue drained on the reactor thread.
    pub internal_queue: TaskQueue,
    /// Queue drained by user worker threads.
    pub user_queue: TaskQueue,
}
