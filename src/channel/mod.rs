//! Channel primitives.
//!
//! One channel shape lives here: a bounded, promise-bearing SPSC channel
//! whose producer side observes pause/resume backpressure. The stream socket
//! adapter runs one per direction.

pub mod bounded;

pub use bounded::{Channel, Readable, SendError, Writable};
