//! millrace — an asynchronous byte-streaming core.
//!
//! The crate provides two tightly coupled pieces:
//!
//! - A generic bounded [channel](crate::channel) that delivers values through
//!   deferred completions ([promises](crate::promise)) and signals
//!   pause/resume so an upstream producer knows when to stop.
//! - A [stream socket adapter](crate::net::stream) that bridges a
//!   reactor-driven OS byte stream to a pair of such channels, pausing OS
//!   reads while the inbound channel is full and bounding outstanding write
//!   bytes with its own hysteresis.
//!
//! The event loop itself is not here: the adapter consumes the narrow
//! [reactor contract](crate::reactor) and schedules every continuation onto
//! executor queues supplied by the embedding runtime. A deterministic
//! [lab reactor](crate::reactor::lab) implements the contract in-process for
//! tests.
//!
//! # Flow control
//!
//! Inbound, backpressure is counted in blocks: the channel flips to paused
//! at its high watermark, the socket stops OS reads, and a one-shot resume
//! notification restarts them once the consumer drains below the low
//! watermark. Outbound, backpressure is counted in bytes: blocks are
//! pipelined into the OS while submitted-but-uncompleted bytes stay under
//! the write cache size.
//!
//! # Example
//!
//! ```ignore
//! let reactor = LabReactor::new();
//! let (wire, _peer) = reactor.pair();
//! let socket = StreamSocket::attach(wire, &reactor.context());
//!
//! socket.outgoing().send(ByteBlock::from_vec(b"hello".to_vec()))?;
//! socket.incoming().receive().on_settle(|block| { /* bytes from peer */ });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bytes;
pub mod channel;
pub mod error;
pub mod exec;
pub mod net;
pub mod promise;
pub mod reactor;
pub mod scope;
pub mod test_logging;

pub use bytes::ByteBlock;
pub use channel::{Channel, Readable, SendError, Writable};
pub use error::{IoErrorKind, StreamError};
pub use net::{SocketOptions, StreamSocket};
pub use promise::{Deferred, Promise};
pub use scope::Scope;
