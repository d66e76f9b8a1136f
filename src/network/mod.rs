//! Transport abstraction layer.
//!
//! The client core only needs two things from a connection: a way to write
//! one structured [`Message`] and a way to read the next one. Both halves
//! are object safe so a connection can be a TCP socket ([`TcpTransport`]),
//! an in-memory pair in tests, or anything else that frames messages.

mod tcp;
pub use tcp::*;


#[cfg(test)]
use mockall::automock;

use async_trait::async_trait;

use crate::Message;
use crate::Result;

/// Write half of a connection.
///
/// Callers serialize access; an implementation never sees two concurrent
/// `send_frame` calls.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Writes and flushes one frame.
    ///
    /// # Errors
    /// An error fails only the request being written: the caller drops its
    /// pending entry and reports the error, and the connection stays up.
    /// Only read errors end the connection.
    async fn send_frame(
        &mut self,
        frame: Message,
    ) -> Result<()>;
}

/// Read half of a connection: a lazy, blocking, infinite sequence of
/// messages.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Waits for the next inbound frame.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionClosed`](crate::TransportError::ConnectionClosed)
    /// at end of stream. Every error ends the receive loop.
    async fn recv_frame(&mut self) -> Result<Message>;
}
