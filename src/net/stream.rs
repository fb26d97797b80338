//! Stream socket adapter.
//!
//! A [`StreamSocket`] bridges one reactor-attached OS byte stream to a pair
//! of bounded channels:
//!
//! ```text
//!                    ┌──────────────── socket ────────────────┐
//!   OS reads ──alloc/read_complete──► writable_in ──► inbound channel ──► incoming()
//!                    │                                        │
//!   OS writes ◄──submit_write──── readable_out ◄── outbound channel ◄── outgoing()
//!                    └──────────── write completions ─────────┘
//! ```
//!
//! Flow control differs per direction. Inbound uses the channel's own
//! item-count backpressure: when the inbound channel pauses, OS reads stop,
//! and a one-shot resume notification restarts them once the consumer drains
//! below the low watermark. Outbound uses byte-level hysteresis: blocks are
//! pipelined into the OS while the submitted-but-uncompleted byte total
//! stays under `write_cache_size`, and the pump picks the outbound channel
//! up again when completions bring the total back under the threshold.
//!
//! Lifetime: the reactor's callback table holds the socket core, and the
//! core holds itself (`keep_alive`) from attach until the close callback
//! acknowledges handle shutdown. After [`StreamSocket::detach`], ownership
//! inverts: each channel holds the core as a scope until it closes, so the
//! socket is destroyed exactly when both channels are closed, all pending
//! writes have completed, and no external owner remains.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::bytes::ByteBlock;
use crate::channel::{Channel, Readable, Writable};
use crate::error::StreamError;
use crate::reactor::{
    ReactorContext, ReadOutcome, StreamEvents, StreamHandle, WriteId, WriteStatus,
};
use crate::scope::Scope;

/// Tuning knobs for a socket attach.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// Inbound channel capacity, in blocks.
    pub backlog_in: usize,
    /// Outbound channel capacity, in blocks.
    pub backlog_out: usize,
    /// Outbound high watermark, in bytes submitted but not yet completed.
    pub write_cache_size: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            backlog_in: 6,
            backlog_out: 10,
            write_cache_size: 64 * 1024,
        }
    }
}

/// Descriptor for an in-flight OS write.
///
/// Holds the block so the buffer stays alive until the completion fires.
struct WriteInfo {
    id: WriteId,
    block: Arc<ByteBlock>,
    len: usize,
}

impl fmt::Debug for WriteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteInfo")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}

struct CoreState {
    /// Producer side of the inbound channel; fed by read completions.
    writable_in: Option<Writable<ByteBlock>>,
    /// Consumer side of the outbound channel; drained by the pump.
    readable_out: Option<Readable<ByteBlock>>,
    /// In-flight write descriptors, oldest first.
    write_reqs: SmallVec<[WriteInfo; 4]>,
    /// Bytes submitted but not yet completed.
    cached_bytes: usize,
    next_write_id: u64,
    /// Self-reference held while the reactor may still call back.
    keep_alive: Option<Arc<SocketCore>>,
}

pub(crate) struct SocketCore {
    handle: Arc<dyn StreamHandle>,
    self_ref: Weak<SocketCore>,
    closed: AtomicBool,
    write_cache_size: usize,
    state: Mutex<CoreState>,
}

impl SocketCore {
    fn arc(&self) -> Option<Arc<Self>> {
        self.self_ref.upgrade()
    }

    fn start_read(&self) {
        self.handle.start_read();
    }

    /// Halts OS reads. With `reschedule`, installs a one-shot resume
    /// notification on the inbound channel so reads restart once the
    /// consumer drains below the low watermark. The hook holds only a weak
    /// reference: a socket torn down while reads are paused is not revived
    /// by a late drain.
    fn stop_read(&self, reschedule: bool) {
        self.handle.stop_read();
        if !reschedule {
            return;
        }
        let writable_in = self.state.lock().writable_in.clone();
        let Some(writable_in) = writable_in else {
            return;
        };
        let weak = self.self_ref.clone();
        writable_in.set_resume_notification_once(move || {
            if let Some(core) = weak.upgrade() {
                core.start_read();
            }
        });
    }

    /// Arms the outbound pump: one receive on the outbound channel, resumed
    /// on the internal queue. Channel closure, however caused, funnels into
    /// the close path.
    fn begin_write(&self) {
        let readable_out = self.state.lock().readable_out.clone();
        let Some(readable_out) = readable_out else {
            // Already closed.
            return;
        };
        let Some(core) = self.arc() else {
            return;
        };
        readable_out.receive().on_settle(move |outcome| match outcome {
            Ok(block) => core.submit_block(block),
            Err(_) => core.close_internal(None),
        });
    }

    /// Submits one block to the OS and pipelines the next receive while the
    /// byte cache has room.
    fn submit_block(&self, block: ByteBlock) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let (id, block, should_read_more) = {
            let mut state = self.state.lock();
            let id = WriteId(state.next_write_id);
            state.next_write_id += 1;

            let len = block.len();
            let block = Arc::new(block);
            state.cached_bytes += len;
            let should_read_more = state.cached_bytes < self.write_cache_size;
            state.write_reqs.push(WriteInfo {
                id,
                block: Arc::clone(&block),
                len,
            });
            (id, block, should_read_more)
        };

        self.handle.submit_write(id, block);

        if should_read_more {
            self.begin_write();
        }
    }

    /// Idempotent close. Closes both channels (attaching `cause` when
    /// present) before the OS handle is relinquished, so a consumer that
    /// observed the close can trust no further bytes arrive. In-flight
    /// writes complete naturally; their completions find `closed` set.
    fn close_internal(&self, cause: Option<StreamError>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (writable_in, readable_out) = {
            let mut state = self.state.lock();
            if state.keep_alive.is_none() {
                state.keep_alive = self.arc();
            }
            (state.writable_in.take(), state.readable_out.take())
        };

        if let Some(writable_in) = writable_in {
            writable_in.clear_resume_notification();
            match cause {
                Some(cause) => writable_in.close_with(cause),
                None => writable_in.close(),
            }
        }

        if let Some(readable_out) = readable_out {
            match cause {
                Some(cause) => readable_out.close_with(cause),
                None => readable_out.close(),
            }
        }

        self.handle.stop_read();
        self.handle.begin_close();
    }
}

impl StreamEvents for SocketCore {
    fn alloc(&self, suggested_size: usize) -> Vec<u8> {
        vec![0; suggested_size]
    }

    fn read_complete(&self, outcome: ReadOutcome, buf: Vec<u8>) {
        match outcome {
            ReadOutcome::Data(n) => {
                let block = ByteBlock::from_filled(buf, n);
                let writable_in = self.state.lock().writable_in.clone();
                let Some(writable_in) = writable_in else {
                    return;
                };
                if writable_in.send(block).is_err() {
                    // The user closed the inbound readable; reads end here
                    // with no resume.
                    self.stop_read(false);
                } else if !writable_in.should_send() {
                    self.stop_read(true);
                }
            }
            ReadOutcome::Eof => {
                drop(buf);
                self.close_internal(None);
            }
            ReadOutcome::Error(code) => {
                drop(buf);
                self.close_internal(Some(StreamError::from_os_code(code)));
            }
        }
    }

    fn write_complete(&self, id: WriteId, status: WriteStatus) {
        let should_write_more = {
            let mut state = self.state.lock();
            let Some(pos) = state.write_reqs.iter().position(|info| info.id == id) else {
                // Reached only on an invariant violation.
                drop(state);
                debug_assert!(false, "write completion for unknown request {id:?}");
                self.close_internal(None);
                return;
            };
            let info = state.write_reqs.remove(pos);
            let size_before = state.cached_bytes;
            state.cached_bytes -= info.len;
            size_before >= self.write_cache_size && state.cached_bytes < self.write_cache_size
        };

        match status {
            WriteStatus::Ok => {
                if should_write_more {
                    self.begin_write();
                }
            }
            WriteStatus::Error(_) => {
                self.close_internal(None);
            }
        }
    }

    fn close_complete(&self) {
        // The handle is fully shut; the socket may now die with its last
        // external owner. The caller still holds its callback-table
        // reference for the duration of this call.
        let keep_alive = self.state.lock().keep_alive.take();
        drop(keep_alive);
    }
}

impl fmt::Debug for SocketCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SocketCore")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("cached_bytes", &state.cached_bytes)
            .field("in_flight_writes", &state.write_reqs.len())
            .finish_non_exhaustive()
    }
}

/// A socket connection bridged to an inbound and an outbound byte channel.
///
/// Constructed over an attached reactor stream handle; dropping the socket
/// closes both channels unless [`detach`](Self::detach) inverted ownership
/// first.
pub struct StreamSocket {
    core: Arc<SocketCore>,
    incoming: Readable<ByteBlock>,
    outgoing: Writable<ByteBlock>,
    detached: bool,
}

impl StreamSocket {
    /// Attaches a socket over a reactor stream handle with default options.
    #[must_use]
    pub fn attach(handle: Arc<dyn StreamHandle>, ctx: &ReactorContext) -> Self {
        Self::attach_with(handle, ctx, SocketOptions::default())
    }

    /// Attaches a socket with explicit tuning.
    ///
    /// Builds the inbound channel on the user queue and the outbound channel
    /// on the internal queue, installs the callback target, records the
    /// keep-alive self-reference, starts OS reads, and arms the outbound
    /// pump.
    #[must_use]
    pub fn attach_with(
        handle: Arc<dyn StreamHandle>,
        ctx: &ReactorContext,
        options: SocketOptions,
    ) -> Self {
        let channel_in = Channel::new(ctx.user_queue.clone(), options.backlog_in);
        let channel_out = Channel::new(ctx.internal_queue.clone(), options.backlog_out);
        let (incoming, writable_in) = channel_in.into_parts();
        let (readable_out, outgoing) = channel_out.into_parts();

        let core = Arc::new_cyclic(|self_ref| SocketCore {
            handle,
            self_ref: self_ref.clone(),
            closed: AtomicBool::new(false),
            write_cache_size: options.write_cache_size.max(1),
            state: Mutex::new(CoreState {
                writable_in: Some(writable_in),
                readable_out: Some(readable_out),
                write_reqs: SmallVec::new(),
                cached_bytes: 0,
                next_write_id: 0,
                keep_alive: None,
            }),
        });

        core.state.lock().keep_alive = Some(Arc::clone(&core));
        core.handle.install(Arc::clone(&core) as Arc<dyn StreamEvents>);
        core.start_read();
        core.begin_write();

        Self {
            core,
            incoming,
            outgoing,
            detached: false,
        }
    }

    /// Returns the inbound endpoint carrying bytes from the peer.
    #[must_use]
    pub fn incoming(&self) -> Readable<ByteBlock> {
        self.incoming.clone()
    }

    /// Returns the outbound endpoint carrying bytes to the peer.
    #[must_use]
    pub fn outgoing(&self) -> Writable<ByteBlock> {
        self.outgoing.clone()
    }

    /// Transfers socket ownership to its channels.
    ///
    /// After detaching, dropping this handle no longer closes anything: each
    /// channel holds the socket until it closes, and the socket is destroyed
    /// once both channels are closed, outstanding writes have drained, and
    /// no external owner remains.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.incoming
            .add_scope_until_closed(Scope::new(Arc::clone(&self.core)));
        self.outgoing
            .add_scope_until_closed(Scope::new(Arc::clone(&self.core)));
    }

    /// Returns true once the socket has entered its close sequence.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }
}

impl Drop for StreamSocket {
    fn drop(&mut self) {
        if !self.detached {
            self.core.close_internal(None);
        }
    }
}

impl fmt::Debug for StreamSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSocket")
            .field("closed", &self.is_closed())
            .field("detached", &self.detached)
            .finish()
    }
}
