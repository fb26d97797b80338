//! Error types for the streaming core.
//!
//! The error surface is deliberately small:
//!
//! - [`StreamError::ChannelClosed`] is the only intrinsic channel failure. A
//!   send or receive that outlives its channel observes it when no more
//!   specific cause was attached at close time.
//! - [`StreamError::Io`] carries a domain error translated from a negative OS
//!   return code delivered by a read or write completion.
//! - Any other failure is surfaced by closing the relevant endpoint with an
//!   attached cause, which rejects current and future receives with that
//!   cause instead of the generic close.
//!
//! Errors are explicit and typed (no stringly-typed errors) and cheap to
//! clone, since one attached cause may reject many parked receivers.

use core::fmt;

/// Domain classification of an OS-level I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoErrorKind {
    /// Connection reset by peer.
    ConnectionReset,
    /// Connection aborted locally.
    ConnectionAborted,
    /// Connection refused by peer.
    ConnectionRefused,
    /// Write on a stream whose read side is gone.
    BrokenPipe,
    /// Operation on a stream that is not connected.
    NotConnected,
    /// Operation timed out at the OS level.
    TimedOut,
    /// Operation was denied by the OS.
    PermissionDenied,
    /// Any other OS error, carrying the raw (negative) return code.
    Other(i32),
}

impl IoErrorKind {
    /// Returns a short stable name for the kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConnectionReset => "connection reset",
            Self::ConnectionAborted => "connection aborted",
            Self::ConnectionRefused => "connection refused",
            Self::BrokenPipe => "broken pipe",
            Self::NotConnected => "not connected",
            Self::TimedOut => "timed out",
            Self::PermissionDenied => "permission denied",
            Self::Other(_) => "os error",
        }
    }
}

impl fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "os error {code}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Failure observed through a channel endpoint or a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamError {
    /// A send or receive occurred after close with no prior-attached cause.
    ChannelClosed,
    /// Translated from an OS return code on a read or write completion.
    Io(IoErrorKind),
    /// Reserved for layered protocols; not produced by this core.
    Protocol,
    /// Buffer allocation failed in the read-allocation path.
    ResourceExhausted,
}

impl StreamError {
    /// Translates a negative OS return code into a domain error.
    ///
    /// The mapping covers the codes a stream socket can actually produce on
    /// read/write completions; anything unrecognized is preserved verbatim in
    /// [`IoErrorKind::Other`]. Allocation failure maps to
    /// [`StreamError::ResourceExhausted`].
    #[must_use]
    pub const fn from_os_code(code: i32) -> Self {
        match code {
            -104 => Self::Io(IoErrorKind::ConnectionReset),
            -103 => Self::Io(IoErrorKind::ConnectionAborted),
            -111 => Self::Io(IoErrorKind::ConnectionRefused),
            -32 => Self::Io(IoErrorKind::BrokenPipe),
            -107 => Self::Io(IoErrorKind::NotConnected),
            -110 => Self::Io(IoErrorKind::TimedOut),
            -13 => Self::Io(IoErrorKind::PermissionDenied),
            -12 => Self::ResourceExhausted,
            other => Self::Io(IoErrorKind::Other(other)),
        }
    }

    /// Returns true for the generic no-cause close failure.
    #[must_use]
    pub const fn is_channel_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed)
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelClosed => f.write_str("channel is closed"),
            Self::Io(kind) => write!(f, "i/o error: {kind}"),
            Self::Protocol => f.write_str("protocol error"),
            Self::ResourceExhausted => f.write_str("resource exhausted"),
        }
    }
}

impl std::error::Error for StreamError {}
