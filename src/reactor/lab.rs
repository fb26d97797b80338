//! Deterministic lab reactor.
//!
//! The lab reactor provides a controllable, deterministic stand-in for the
//! OS event loop: tests inject reads, EOF, and errors, choose when write
//! completions fire, and drain the executor queues explicitly. Everything
//! runs on the calling thread, which plays the role of the reactor thread.
//!
//! Two wirings are offered:
//!
//! - [`LabReactor::stream`] — a standalone stream whose writes complete only
//!   when the test calls [`LabStream::complete_next_write`].
//! - [`LabReactor::pair`] — two cross-wired streams forming an in-process
//!   loopback: write completions are scheduled on the internal queue, like a
//!   later iteration of a real reactor loop, and completed bytes are
//!   delivered as readable data on the other side.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::bytes::ByteBlock;
use crate::exec::{ManualExecutor, TaskQueue};
use crate::reactor::{
    ReactorContext, ReadOutcome, StreamEvents, StreamHandle, WriteId, WriteStatus,
};

const DEFAULT_READ_SIZE: usize = 4096;

/// Deterministic reactor hosting lab streams and the two executor queues.
pub struct LabReactor {
    internal: Arc<ManualExecutor>,
    user: Arc<ManualExecutor>,
}

impl LabReactor {
    /// Creates a reactor with empty queues.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            internal: ManualExecutor::new(),
            user: ManualExecutor::new(),
        })
    }

    /// Returns the queues a socket receives at attach time.
    #[must_use]
    pub fn context(&self) -> ReactorContext {
        ReactorContext {
            internal_queue: self.internal.queue(),
            user_queue: self.user.queue(),
        }
    }

    /// Creates a standalone stream with manual write completion.
    #[must_use]
    pub fn stream(&self) -> Arc<LabStream> {
        LabStream::new(self.internal.queue(), false)
    }

    /// Creates two cross-wired streams forming an in-process loopback.
    #[must_use]
    pub fn pair(&self) -> (Arc<LabStream>, Arc<LabStream>) {
        let a = LabStream::new(self.internal.queue(), true);
        let b = LabStream::new(self.internal.queue(), true);
        a.state.lock().peer = Some(Arc::downgrade(&b));
        b.state.lock().peer = Some(Arc::downgrade(&a));
        (a, b)
    }

    /// Drains both queues until neither has pending work. Returns the number
    /// of tasks that ran.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        loop {
            let pass = self.internal.run_until_idle() + self.user.run_until_idle();
            if pass == 0 {
                return ran;
            }
            ran += pass;
        }
    }
}

enum Inbound {
    Data(Vec<u8>),
    Eof,
    Error(i32),
}

struct LabStreamState {
    events: Option<Arc<dyn StreamEvents>>,
    reading: bool,
    closed: bool,
    /// Peer-delivered input not yet handed to the read callback.
    inbox: VecDeque<Inbound>,
    /// Writes submitted but not yet completed.
    pending_writes: VecDeque<(WriteId, Arc<ByteBlock>)>,
    peer: Option<Weak<LabStream>>,
    /// Every byte ever submitted for write, in submission order.
    written: Vec<u8>,
}

/// One side of a lab stream: implements the handle half of the reactor
/// contract and exposes injection and inspection hooks for tests.
pub struct LabStream {
    state: Mutex<LabStreamState>,
    self_ref: Weak<LabStream>,
    queue: TaskQueue,
    auto_complete_writes: bool,
    suggested_read_size: usize,
    alloc_count: AtomicUsize,
    read_start_count: AtomicUsize,
    read_stop_count: AtomicUsize,
}

impl LabStream {
    fn new(queue: TaskQueue, auto_complete_writes: bool) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            state: Mutex::new(LabStreamState {
                events: None,
                reading: false,
                closed: false,
                inbox: VecDeque::new(),
                pending_writes: VecDeque::new(),
                peer: None,
                written: Vec::new(),
            }),
            self_ref: self_ref.clone(),
            queue,
            auto_complete_writes,
            suggested_read_size: DEFAULT_READ_SIZE,
            alloc_count: AtomicUsize::new(0),
            read_start_count: AtomicUsize::new(0),
            read_stop_count: AtomicUsize::new(0),
        })
    }

    // --- injection (the "peer" side of the wire) ---

    /// Queues bytes from the peer; delivered through the read callbacks while
    /// reading is active.
    pub fn deliver(&self, bytes: impl Into<Vec<u8>>) {
        self.state.lock().inbox.push_back(Inbound::Data(bytes.into()));
        self.drain_inbox();
    }

    /// Queues a clean end-of-stream.
    pub fn deliver_eof(&self) {
        self.state.lock().inbox.push_back(Inbound::Eof);
        self.drain_inbox();
    }

    /// Queues an OS-level read error with the given (negative) code.
    pub fn deliver_error(&self, code: i32) {
        self.state.lock().inbox.push_back(Inbound::Error(code));
        self.drain_inbox();
    }

    /// Completes the oldest pending write with `status`. On success the bytes
    /// are forwarded to the peer, if one is wired. Returns false if no write
    /// was pending.
    pub fn complete_next_write(&self, status: WriteStatus) -> bool {
        let Some((id, block)) = self.state.lock().pending_writes.pop_front() else {
            return false;
        };
        self.finish_write(id, &block, status);
        true
    }

    // --- inspection ---

    /// All bytes submitted for write so far, in submission order.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Number of writes submitted but not completed.
    #[must_use]
    pub fn pending_write_count(&self) -> usize {
        self.state.lock().pending_writes.len()
    }

    /// Total bytes held by submitted-but-uncompleted writes.
    #[must_use]
    pub fn outstanding_write_bytes(&self) -> usize {
        self.state
            .lock()
            .pending_writes
            .iter()
            .map(|(_, block)| block.len())
            .sum()
    }

    /// Whether reads are currently active.
    #[must_use]
    pub fn is_reading(&self) -> bool {
        self.state.lock().reading
    }

    /// Whether a callback target is still installed. Cleared after
    /// `close_complete` has been acknowledged.
    #[must_use]
    pub fn events_installed(&self) -> bool {
        self.state.lock().events.is_some()
    }

    /// How many read buffers have been allocated.
    #[must_use]
    pub fn alloc_count(&self) -> usize {
        self.alloc_count.load(Ordering::SeqCst)
    }

    /// How many times reads have been started.
    #[must_use]
    pub fn read_start_count(&self) -> usize {
        self.read_start_count.load(Ordering::SeqCst)
    }

    /// How many times reads have been stopped.
    #[must_use]
    pub fn read_stop_count(&self) -> usize {
        self.read_stop_count.load(Ordering::SeqCst)
    }

    // --- internals ---

    /// Hands queued input to the read callbacks, one item at a time. The
    /// state lock is never held across a callback: callbacks re-enter this
    /// stream through `stop_read` and `submit_write`.
    fn drain_inbox(&self) {
        loop {
            let (events, item) = {
                let mut state = self.state.lock();
                if !state.reading || state.closed {
                    return;
                }
                let Some(events) = state.events.clone() else {
                    return;
                };
                let Some(item) = state.inbox.pop_front() else {
                    return;
                };
                (events, item)
            };

            self.alloc_count.fetch_add(1, Ordering::SeqCst);
            match item {
                Inbound::Data(bytes) => {
                    let suggested = self.suggested_read_size.max(bytes.len());
                    let mut buf = events.alloc(suggested);
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    events.read_complete(ReadOutcome::Data(n), buf);
                }
                Inbound::Eof => {
                    let buf = events.alloc(self.suggested_read_size);
                    events.read_complete(ReadOutcome::Eof, buf);
                }
                Inbound::Error(code) => {
                    let buf = events.alloc(self.suggested_read_size);
                    events.read_complete(ReadOutcome::Error(code), buf);
                }
            }
        }
    }

    /// Removes a pending write by identity and completes it.
    fn auto_complete(&self, id: WriteId) {
        let block = {
            let mut state = self.state.lock();
            let Some(pos) = state.pending_writes.iter().position(|(wid, _)| *wid == id) else {
                return;
            };
            state.pending_writes.remove(pos).map(|(_, block)| block)
        };
        if let Some(block) = block {
            self.finish_write(id, &block, WriteStatus::Ok);
        }
    }

    fn finish_write(&self, id: WriteId, block: &Arc<ByteBlock>, status: WriteStatus) {
        let (events, peer) = {
            let state = self.state.lock();
            (state.events.clone(), state.peer.clone())
        };
        if status == WriteStatus::Ok {
            if let Some(peer) = peer.and_then(|weak| weak.upgrade()) {
                peer.deliver(block.as_slice().to_vec());
            }
        }
        if let Some(events) = events {
            events.write_complete(id, status);
        }
    }
}

impl StreamHandle for LabStream {
    fn install(&self, events: Arc<dyn StreamEvents>) {
        let mut state = self.state.lock();
        debug_assert!(state.events.is_none(), "events installed twice");
        state.events = Some(events);
    }

    fn start_read(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.reading = true;
        }
        self.read_start_count.fetch_add(1, Ordering::SeqCst);
        // Input that arrived while reads were stopped flows now.
        self.drain_inbox();
    }

    fn stop_read(&self) {
        let mut state = self.state.lock();
        if state.reading {
            state.reading = false;
            self.read_stop_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn submit_write(&self, id: WriteId, block: Arc<ByteBlock>) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.written.extend_from_slice(block.as_slice());
            state.pending_writes.push_back((id, Arc::clone(&block)));
        }
        if self.auto_complete_writes {
            let weak = self.self_ref.clone();
            self.queue.push(move || {
                if let Some(stream) = weak.upgrade() {
                    stream.auto_complete(id);
                }
            });
        }
    }

    fn begin_close(&self) {
        let peer = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.reading = false;
            state.inbox.clear();
            state.peer.take()
        };
        // A closed side reads as EOF on the other end of the wire.
        if let Some(peer) = peer.and_then(|weak| weak.upgrade()) {
            peer.deliver_eof();
        }
        // Acknowledge asynchronously, like a real close callback, and only
        // then let go of the callback table entry.
        let weak = self.self_ref.clone();
        self.queue.push(move || {
            let Some(stream) = weak.upgrade() else {
                return;
            };
            let events = stream.state.lock().events.clone();
            if let Some(events) = events {
                events.close_complete();
            }
            stream.state.lock().events = None;
        });
    }
}
