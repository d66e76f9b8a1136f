use std::fmt;
use std::sync::Arc;

use crate::Message;

/// Shared handle to a subscriber callback.
///
/// Handles compare by identity: two clones of the same `Callback` are equal,
/// two callbacks built from identical closures are not. `unsubscribe` relies
/// on this to remove exactly the registration it was given.
#[derive(Clone)]
pub struct Callback {
    f: Arc<dyn Fn(Message) + Send + Sync>,
    inline: bool,
}

impl Callback {
    pub fn new(f: impl Fn(Message) + Send + Sync + 'static) -> Self {
        Self {
            f: Arc::new(f),
            inline: false,
        }
    }

    /// A callback run directly on the receive loop, in frame order.
    /// Reserved for short internal bookkeeping that must be visible before
    /// later frames are routed.
    pub(crate) fn inline(f: impl Fn(Message) + Send + Sync + 'static) -> Self {
        Self {
            f: Arc::new(f),
            inline: true,
        }
    }

    pub(crate) fn is_inline(&self) -> bool {
        self.inline
    }

    pub(crate) fn call(
        &self,
        msg: Message,
    ) {
        (self.f)(msg)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.f) as *const ()
    }
}

impl PartialEq for Callback {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Callback {}

impl fmt::Debug for Callback {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Callback({:p})", self.addr())
    }
}
