//! Socket adapters over the reactor contract.

pub mod stream;

pub use stream::{SocketOptions, StreamSocket};
