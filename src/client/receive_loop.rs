use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::trace;

use super::RequestCorrelator;
use super::SubscriptionRegistry;
use crate::FrameSource;
use crate::Message;
use crate::Result;

/// The single consumer of inbound frames.
///
/// Events feed the subscription registry, frames carrying a sequence number
/// resolve pending requests. A frame may do both. Subscriber callbacks are
/// queued from here; only internal inline callbacks run on this task.
pub(crate) struct ReceiveLoop {
    source: Box<dyn FrameSource>,
    correlator: Arc<RequestCorrelator>,
    registry: Arc<SubscriptionRegistry>,
    shutdown: CancellationToken,
}

impl ReceiveLoop {
    pub(crate) fn new(
        source: Box<dyn FrameSource>,
        correlator: Arc<RequestCorrelator>,
        registry: Arc<SubscriptionRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            correlator,
            registry,
            shutdown,
        }
    }

    /// Runs until shutdown or the first transport error.
    ///
    /// Either way every waiter is released before returning. The transport
    /// error, if any, is returned so `Client::shutdown` can report it.
    pub(crate) async fn run(mut self) -> Result<()> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("receive loop stopped");
                    self.release_waiters();
                    return Ok(());
                }
                frame = self.source.recv_frame() => frame,
            };

            match frame {
                Ok(msg) => self.route(msg),
                Err(e) => {
                    error!(error = %e, "receive loop failed");
                    self.release_waiters();
                    return Err(e);
                }
            }
        }
    }

    pub(crate) fn route(
        &self,
        msg: Message,
    ) {
        trace!(%msg, "recv");
        if msg.is_event() {
            self.registry.on_event(&msg);
        }
        if msg.sequence_number != 0 {
            self.correlator.resolve(msg);
        }
    }

    fn release_waiters(&self) {
        self.correlator.fail_all();
        self.registry.fail_all();
    }
}
