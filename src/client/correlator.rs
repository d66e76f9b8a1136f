//! Request/reply correlation.
//!
//! Every outgoing request is stamped with a connection-unique sequence
//! number. When the request expects an answer, a pending entry keyed by that
//! number is registered *before* the frame hits the wire, so a reply can
//! never race ahead of its registration. The receive loop resolves entries
//! by sequence number; everything else about waiting happens on the caller's
//! task.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::Callback;
use super::Dispatcher;
use crate::Error;
use crate::FrameSink;
use crate::Message;
use crate::Request;
use crate::Result;

/// How long a sender is willing to wait for the reply.
#[derive(Debug, Clone)]
pub enum ReplyWait {
    /// Return as soon as the frame is written.
    NoWait,
    /// Wait up to the given duration. A zero duration behaves like `NoWait`.
    Timeout(Duration),
    /// Wait until the reply arrives, the connection drops, or the token is
    /// cancelled.
    Indefinite(CancellationToken),
}

impl ReplyWait {
    fn normalize(self) -> Self {
        match self {
            ReplyWait::Timeout(d) if d.is_zero() => ReplyWait::NoWait,
            other => other,
        }
    }

    fn expects_reply(&self) -> bool {
        !matches!(self, ReplyWait::NoWait)
    }
}

/// One outstanding request.
///
/// Removed exactly once: by the matching reply, by a timed-out waiter that
/// has no callback to keep it alive, or by connection failure.
#[derive(Debug)]
struct PendingRequest {
    callback: Option<Callback>,
    waiter: Option<oneshot::Sender<Message>>,
}

struct Wire {
    next_sn: u32,
    sink: Box<dyn FrameSink>,
}

pub(crate) struct RequestCorrelator {
    wire: Mutex<Wire>,
    pending: DashMap<u32, PendingRequest>,
    dispatcher: Dispatcher,
    connection_lost: CancellationToken,
}

impl RequestCorrelator {
    pub(crate) fn new(
        sink: Box<dyn FrameSink>,
        dispatcher: Dispatcher,
        connection_lost: CancellationToken,
    ) -> Self {
        Self {
            wire: Mutex::new(Wire { next_sn: 1, sink }),
            pending: DashMap::new(),
            dispatcher,
            connection_lost,
        }
    }

    /// Writes `request` and optionally waits for its reply.
    ///
    /// Returns `Ok(None)` when no reply was awaited or the timeout elapsed.
    /// The callback, if any, still fires when a late reply arrives.
    ///
    /// # Errors
    /// - [`TransportError::ConnectionClosed`](crate::TransportError::ConnectionClosed)
    ///   if the connection is gone before or while waiting
    /// - [`Error::Cancelled`] when an indefinite wait's token fires
    /// - any error from the frame sink
    pub(crate) async fn send(
        &self,
        request: Request,
        callback: Option<Callback>,
        wait: ReplyWait,
    ) -> Result<Option<Message>> {
        if self.connection_lost.is_cancelled() {
            return Err(Error::connection_closed());
        }

        let wait = wait.normalize();
        let (waiter, reply) = if wait.expects_reply() {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let track = callback.is_some() || waiter.is_some();

        let sn = {
            let mut wire = self.wire.lock().await;
            let sn = wire.next_sn;
            wire.next_sn = match wire.next_sn.wrapping_add(1) {
                0 => 1,
                n => n,
            };

            if track {
                self.pending.insert(sn, PendingRequest { callback, waiter });
            }

            let frame = request.into_message(sn);
            debug!(sn, command = ?frame.command, property = %frame.property_name, "send");
            if let Err(e) = wire.sink.send_frame(frame).await {
                warn!(sn, error = %e, "write failed");
                self.pending.remove(&sn);
                return Err(e);
            }
            sn
        };

        let Some(mut reply) = reply else {
            return Ok(None);
        };

        match wait {
            ReplyWait::NoWait => Ok(None),
            ReplyWait::Timeout(d) => {
                tokio::select! {
                    biased;
                    r = &mut reply => r.map(Some).map_err(|_| Error::connection_closed()),
                    _ = self.connection_lost.cancelled() => Err(Error::connection_closed()),
                    _ = tokio::time::sleep(d) => {
                        self.abandon_wait(sn);
                        if let Ok(msg) = reply.try_recv() {
                            return Ok(Some(msg));
                        }
                        trace!(sn, ?d, "reply timed out");
                        Ok(None)
                    }
                }
            }
            ReplyWait::Indefinite(token) => {
                tokio::select! {
                    biased;
                    r = &mut reply => r.map(Some).map_err(|_| Error::connection_closed()),
                    _ = self.connection_lost.cancelled() => Err(Error::connection_closed()),
                    _ = token.cancelled() => {
                        self.abandon_wait(sn);
                        if let Ok(msg) = reply.try_recv() {
                            return Ok(Some(msg));
                        }
                        Err(Error::Cancelled)
                    }
                }
            }
        }
    }

    /// Drops the waiter of `sn`. The entry survives if a callback still
    /// wants the reply.
    fn abandon_wait(
        &self,
        sn: u32,
    ) {
        if self.pending.remove_if(&sn, |_, p| p.callback.is_none()).is_some() {
            return;
        }
        if let Some(mut entry) = self.pending.get_mut(&sn) {
            entry.waiter = None;
        }
    }

    /// Hands a reply to whoever asked for it. Returns false when nobody is
    /// waiting for that sequence number.
    pub(crate) fn resolve(
        &self,
        msg: Message,
    ) -> bool {
        let sn = msg.sequence_number;
        let Some((_, pending)) = self.pending.remove(&sn) else {
            trace!(sn, "no pending request, reply dropped");
            return false;
        };

        if let Some(callback) = &pending.callback {
            self.dispatcher.deliver(callback, msg.clone());
        }
        if let Some(waiter) = pending.waiter {
            if waiter.send(msg).is_err() {
                trace!(sn, "waiter already gone");
            }
        }
        true
    }

    /// Releases every waiter with a connection-closed error.
    pub(crate) fn fail_all(&self) {
        self.connection_lost.cancel();
        let n = self.pending.len();
        self.pending.clear();
        if n > 0 {
            debug!(n, "released pending requests");
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
