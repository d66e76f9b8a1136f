use async_trait::async_trait;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::codec::FramedWrite;
use tracing::debug;

use super::FrameSink;
use super::FrameSource;
use crate::Error;
use crate::Message;
use crate::NetworkConfig;
use crate::Result;
use crate::SvCodec;
use crate::TransportError;

/// Writes frames to the socket's write half.
pub struct TcpFrameSink {
    inner: FramedWrite<OwnedWriteHalf, SvCodec>,
}

/// Reads frames from the socket's read half.
pub struct TcpFrameSource {
    inner: FramedRead<OwnedReadHalf, SvCodec>,
}

pub struct TcpTransport;

impl TcpTransport {
    /// Opens the server socket and returns its framed halves.
    ///
    /// # Errors
    /// - [`TransportError::ConnectTimeout`] if the connect deadline passes
    /// - [`TransportError::Io`] for socket errors
    pub async fn connect(config: &NetworkConfig) -> Result<(TcpFrameSink, TcpFrameSource)> {
        let addr = config.address();
        let duration = config.connect_timeout();

        let stream = timeout(duration, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr: addr.clone(),
                duration,
            })??;
        stream.set_nodelay(config.tcp_nodelay)?;
        debug!(%addr, "connected");

        Ok(Self::from_stream(stream, config.max_frame_size))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(
        stream: TcpStream,
        max_frame_size: usize,
    ) -> (TcpFrameSink, TcpFrameSource) {
        let (read, write) = stream.into_split();
        (
            TcpFrameSink {
                inner: FramedWrite::new(write, SvCodec::new(max_frame_size)),
            },
            TcpFrameSource {
                inner: FramedRead::new(read, SvCodec::new(max_frame_size)),
            },
        )
    }
}

#[async_trait]
impl FrameSink for TcpFrameSink {
    async fn send_frame(
        &mut self,
        frame: Message,
    ) -> Result<()> {
        self.inner.send(frame).await
    }
}

#[async_trait]
impl FrameSource for TcpFrameSource {
    async fn recv_frame(&mut self) -> Result<Message> {
        match self.inner.next().await {
            Some(frame) => frame,
            None => Err(Error::connection_closed()),
        }
    }
}
