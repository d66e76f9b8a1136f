//! Client engine for one server connection
//!
//! Provides the components that sit between a framed transport and user code:
//! - [`Client`] - Cloneable handle with the full operation surface
//! - [`Callback`] - Identity-compared subscriber callback
//! - [`ReplyWait`] - How long a request waits for its reply
//! - [`SubscribeMode`] - Confirmed or fire-and-forget subscriptions
//!
//! # Basic Usage
//! ```no_run
//! use certif_link::{Callback, Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> certif_link::Result<()> {
//!     let client = Client::connect(ClientConfig::new()?.validate()?).await?;
//!
//!     client
//!         .subscribe("temp/value", Callback::new(|msg| println!("temp = {}", msg.body_str())))
//!         .await?;
//!     client.set("var/x", "5").await?;
//!     let (_, output) = client.run("wa").await?;
//!     println!("{output}");
//!
//!     client.shutdown().await
//! }
//! ```

mod callback;
mod console;
mod correlator;
mod counter;
mod dispatcher;
mod receive_loop;
mod registry;
mod watch;

pub use callback::*;
pub use correlator::ReplyWait;
pub use counter::*;
pub use registry::PropertyPhase;
pub use registry::SubscribeMode;

pub(crate) use console::ConsoleCapture;
pub(crate) use correlator::RequestCorrelator;
pub(crate) use dispatcher::Dispatcher;
pub(crate) use receive_loop::ReceiveLoop;
pub(crate) use registry::SubscriptionRegistry;
pub(crate) use watch::WatchCache;


use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::constants::CONSOLE_PROPERTY;
use crate::constants::ERROR_PROPERTY;
use crate::ClientConfig;
use crate::Error;
use crate::FrameSink;
use crate::FrameSource;
use crate::Message;
use crate::Request;
use crate::Result;
use crate::TcpTransport;

/// Handle to one live connection.
///
/// Cheap to clone; all clones share the same connection. The connection is
/// torn down by [`Client::shutdown`], by a transport failure, or when the
/// last clone is dropped.
#[derive(Clone)]
pub struct Client {
    pub(super) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(super) config: ClientConfig,
    pub(super) correlator: Arc<RequestCorrelator>,
    pub(super) registry: Arc<SubscriptionRegistry>,
    pub(super) dispatcher: Dispatcher,
    pub(super) watches: WatchCache,
    pub(super) console: Arc<ConsoleCapture>,
    pub(super) counters: parking_lot::Mutex<Option<Vec<CounterInfo>>>,
    pub(super) shutdown: CancellationToken,
    pub(super) connection_lost: CancellationToken,
    receive_loop: parking_lot::Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Client {
    /// Connects over TCP to the server named by `config.network`.
    ///
    /// # Errors
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`TransportError`](crate::TransportError) if the socket cannot be opened
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let config = config.validate()?;
        let (sink, source) = TcpTransport::connect(&config.network).await?;
        Self::with_transport(sink, source, config).await
    }

    /// Starts the engine over an already established transport.
    ///
    /// Spawns the receive loop and callback dispatcher, then registers the
    /// standing `error` subscription (and the console capture when enabled).
    pub async fn with_transport(
        sink: impl FrameSink,
        source: impl FrameSource,
        config: ClientConfig,
    ) -> Result<Self> {
        let config = config.validate()?;
        let shutdown = CancellationToken::new();
        let connection_lost = CancellationToken::new();

        let dispatcher = Dispatcher::start(config.dispatch.max_concurrent_callbacks, shutdown.clone());
        let correlator = Arc::new(RequestCorrelator::new(
            Box::new(sink),
            dispatcher.clone(),
            connection_lost.clone(),
        ));
        let registry = Arc::new(SubscriptionRegistry::new(correlator.clone(), dispatcher.clone()));

        let receive_loop = ReceiveLoop::new(Box::new(source), correlator.clone(), registry.clone(), shutdown.clone());
        let handle = tokio::spawn(receive_loop.run());

        let client = Self {
            inner: Arc::new(ClientInner {
                config,
                correlator,
                registry,
                dispatcher,
                watches: WatchCache::default(),
                console: Arc::new(ConsoleCapture::default()),
                counters: parking_lot::Mutex::new(None),
                shutdown,
                connection_lost,
                receive_loop: parking_lot::Mutex::new(Some(handle)),
            }),
        };

        let server_errors = Callback::new(|msg: Message| warn!(error = %msg.body_str(), "server error"));
        client
            .subscribe_with(ERROR_PROPERTY, server_errors, SubscribeMode::FireAndForget)
            .await?;

        if client.inner.config.console.capture {
            client
                .subscribe_with(
                    CONSOLE_PROPERTY,
                    client.inner.console.callback(),
                    SubscribeMode::FireAndForget,
                )
                .await?;
        }

        info!("client started");
        Ok(client)
    }

    /// Low-level send. Most callers want one of the typed operations.
    ///
    /// `callback` fires with the reply whenever it arrives, even after the
    /// wait gave up.
    pub async fn request(
        &self,
        request: Request,
        callback: Option<Callback>,
        wait: ReplyWait,
    ) -> Result<Option<Message>> {
        self.inner.correlator.send(request, callback, wait).await
    }

    /// Subscribes and waits up to the configured subscribe timeout for the
    /// first event.
    ///
    /// Returns `Ok(false)` on timeout, with nothing left registered.
    ///
    /// # Errors
    /// - [`ProtocolError::NoSuchProperty`](crate::ProtocolError::NoSuchProperty)
    ///   if the server reports the property does not exist
    pub async fn subscribe(
        &self,
        property: &str,
        callback: Callback,
    ) -> Result<bool> {
        let timeout = self.inner.config.timeouts.subscribe_timeout();
        self.subscribe_with(property, callback, SubscribeMode::Confirm(timeout))
            .await
    }

    pub async fn subscribe_with(
        &self,
        property: &str,
        callback: Callback,
        mode: SubscribeMode,
    ) -> Result<bool> {
        self.inner.registry.subscribe(property, callback, mode).await
    }

    /// Removes one registration. Idempotent: returns `Ok(false)` when the
    /// callback was not registered for `property`.
    pub async fn unsubscribe(
        &self,
        property: &str,
        callback: &Callback,
    ) -> Result<bool> {
        self.inner.registry.unsubscribe(property, callback).await
    }

    pub fn subscription_phase(
        &self,
        property: &str,
    ) -> PropertyPhase {
        self.inner.registry.phase(property)
    }

    /// False once the connection failed or shutdown was requested.
    pub fn is_connected(&self) -> bool {
        !self.inner.connection_lost.is_cancelled() && !self.inner.shutdown.is_cancelled()
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::connection_closed())
        }
    }

    /// Stops the receive loop and dispatcher, releasing all waiters.
    ///
    /// # Errors
    /// Returns the transport error that ended the receive loop, if one did.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown.cancel();
        let handle = self.inner.receive_loop.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Fatal(format!("receive loop panicked: {e}")))?,
            None => Ok(()),
        }
    }
}
