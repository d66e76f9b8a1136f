//! Client Error Hierarchy
//!
//! Errors are grouped by where they originate: configuration, the server
//! protocol, the transport underneath it, and caller misuse. A reply that
//! never arrives is not an error; it surfaces as `Ok(None)` or `Ok(false)`.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation or loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The server answered, and the answer was a failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection itself failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The caller asked for something that was never set up
    #[error(transparent)]
    Misuse(#[from] MisuseError),

    /// An indefinite wait was released by its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The server reported the property does not exist
    #[error("Property {property} does not exist: {message}")]
    NoSuchProperty { property: String, message: String },

    /// The server replied to a write with an error
    #[error("Server rejected write to {property}: {message}")]
    Rejected { property: String, message: String },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Bad header magic {0:#x}")]
    BadMagic(u32),

    #[error("Frame body of {len} bytes exceeds limit {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Body could not be interpreted as the expected value
    #[error("Invalid value for {property}: {body:?}")]
    InvalidValue { property: String, body: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Connect to {addr} timed out after {duration:?}")]
    ConnectTimeout { addr: String, duration: Duration },

    /// Terminal: the receive loop has stopped
    #[error("Connection closed")]
    ConnectionClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum MisuseError {
    #[error("Property {0} is not watched")]
    NotWatched(String),

    #[error("Property {0} is already watched")]
    AlreadyWatched(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(TransportError::Io(e))
    }
}

impl Error {
    /// True when the connection is gone and no further request can succeed.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Error::Transport(TransportError::ConnectionClosed))
    }

    pub(crate) fn connection_closed() -> Self {
        Error::Transport(TransportError::ConnectionClosed)
    }
}
