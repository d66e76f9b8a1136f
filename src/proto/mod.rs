//! Message model and wire codec.
//!
//! [`Message`] is the structured frame every other layer works with. The
//! [`SvCodec`] turns it into the server's fixed-header binary framing and
//! back; nothing above the transport sees bytes.

mod codec;
mod message;

pub use codec::*;
pub use message::*;
