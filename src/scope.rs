//! Scoped resources tied to a channel's lifetime.
//!
//! A [`Scope`] owns an arbitrary resource and releases it when dropped.
//! Channels accept scopes through `add_scope_until_closed`, holding them
//! until the channel closes; this is how a detached socket is kept alive by
//! the channels it feeds.

use core::fmt;
use std::any::Any;

/// An owned resource released when the scope is dropped.
pub struct Scope {
    _resource: Box<dyn Any + Send>,
}

impl Scope {
    /// Wraps a resource so its lifetime can be tied to a channel.
    #[must_use]
    pub fn new<R: Any + Send>(resource: R) -> Self {
        Self {
            _resource: Box::new(resource),
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").finish_non_exhaustive()
    }
}
