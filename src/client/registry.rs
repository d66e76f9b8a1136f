//! Property subscriptions.
//!
//! Each property is in exactly one phase:
//!
//! ```text
//! Unregistered --subscribe--> PendingFirstSubscribe --first event--> Active
//!       ^                            |                                  |
//!       +---- existence error / -----+                                  |
//!       |     timeout (UNREGISTER)                                      |
//!       +-------------------------- last callback removed (UNREGISTER) -+
//! ```
//!
//! The phase table is only ever mutated under one short synchronous lock.
//! The receive loop performs the promotion to `Active` itself, so a first
//! event cannot be lost between "REGISTER written" and "subscriber waiting".
//! Subscribe and unsubscribe calls are additionally serialized by an async
//! gate, which keeps at most one property pending at a time and lets a
//! server-wide `error` event be attributed to it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::Callback;
use super::Dispatcher;
use super::ReplyWait;
use super::RequestCorrelator;
use crate::constants::ERROR_PROPERTY;
use crate::Error;
use crate::Message;
use crate::ProtocolError;
use crate::Request;
use crate::Result;

/// How a subscribe call relates to the server's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeMode {
    /// Wait up to the duration for the first event or an existence error.
    Confirm(Duration),
    /// Register and return immediately, trusting the property exists.
    FireAndForget,
}

/// Externally visible phase of one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyPhase {
    Unregistered,
    PendingFirstSubscribe,
    Active,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FirstEvent {
    Confirmed,
    NoSuchProperty(String),
}

#[derive(Debug)]
enum PropertyState {
    PendingFirstSubscribe {
        callback: Callback,
        outcome: oneshot::Sender<FirstEvent>,
    },
    Active {
        callbacks: Vec<Callback>,
        last: Option<Message>,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Abandon {
    /// Still pending; the entry was removed
    WasPending,
    /// The first event won the race
    AlreadyActive,
    /// Resolved by an existence error or connection loss
    Gone,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Removal {
    NotFound,
    Removed,
    RemovedLast,
}

/// Pure phase bookkeeping, with no I/O.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionTable {
    properties: HashMap<String, PropertyState>,
}

impl SubscriptionTable {
    pub(crate) fn phase(
        &self,
        property: &str,
    ) -> PropertyPhase {
        match self.properties.get(property) {
            None => PropertyPhase::Unregistered,
            Some(PropertyState::PendingFirstSubscribe { .. }) => PropertyPhase::PendingFirstSubscribe,
            Some(PropertyState::Active { .. }) => PropertyPhase::Active,
        }
    }

    /// Adds `callback` to an already active property. Returns `None` if the
    /// property is not active, otherwise the cached last message.
    pub(crate) fn join_active(
        &mut self,
        property: &str,
        callback: &Callback,
    ) -> Option<Option<Message>> {
        match self.properties.get_mut(property) {
            Some(PropertyState::Active { callbacks, last }) => {
                callbacks.push(callback.clone());
                Some(last.clone())
            }
            _ => None,
        }
    }

    pub(crate) fn insert_active(
        &mut self,
        property: &str,
        callback: Callback,
    ) {
        self.properties.insert(
            property.to_string(),
            PropertyState::Active {
                callbacks: vec![callback],
                last: None,
            },
        );
    }

    pub(crate) fn begin_first_subscribe(
        &mut self,
        property: &str,
        callback: Callback,
    ) -> oneshot::Receiver<FirstEvent> {
        let (outcome, rx) = oneshot::channel();
        self.properties.insert(
            property.to_string(),
            PropertyState::PendingFirstSubscribe { callback, outcome },
        );
        rx
    }

    pub(crate) fn abandon_pending(
        &mut self,
        property: &str,
    ) -> Abandon {
        match self.properties.get(property) {
            Some(PropertyState::PendingFirstSubscribe { .. }) => {
                self.properties.remove(property);
                Abandon::WasPending
            }
            Some(PropertyState::Active { .. }) => Abandon::AlreadyActive,
            None => Abandon::Gone,
        }
    }

    /// Drops the entry for `property` whatever its phase.
    pub(crate) fn forget(
        &mut self,
        property: &str,
    ) {
        self.properties.remove(property);
    }

    pub(crate) fn remove_callback(
        &mut self,
        property: &str,
        callback: &Callback,
    ) -> Removal {
        let Some(PropertyState::Active { callbacks, .. }) = self.properties.get_mut(property) else {
            return Removal::NotFound;
        };
        let Some(pos) = callbacks.iter().position(|c| c == callback) else {
            return Removal::NotFound;
        };
        callbacks.remove(pos);
        if callbacks.is_empty() {
            self.properties.remove(property);
            Removal::RemovedLast
        } else {
            Removal::Removed
        }
    }

    /// Applies one pushed event and returns the callbacks that must see it.
    pub(crate) fn on_event(
        &mut self,
        msg: &Message,
    ) -> Vec<(Callback, Message)> {
        let mut deliveries = Vec::new();

        if msg.property_name == ERROR_PROPERTY {
            self.fail_pending(&msg.body_str());
        }

        match self.properties.get_mut(&msg.property_name) {
            None => {
                trace!(property = %msg.property_name, "event for unregistered property ignored");
                return deliveries;
            }
            Some(PropertyState::Active { callbacks, last }) => {
                *last = Some(msg.clone());
                deliveries.extend(callbacks.iter().map(|c| (c.clone(), msg.clone())));
                return deliveries;
            }
            Some(PropertyState::PendingFirstSubscribe { .. }) => {}
        }

        // First event: promote to active.
        if let Some(PropertyState::PendingFirstSubscribe { callback, outcome }) =
            self.properties.remove(&msg.property_name)
        {
            self.properties.insert(
                msg.property_name.clone(),
                PropertyState::Active {
                    callbacks: vec![callback.clone()],
                    last: Some(msg.clone()),
                },
            );
            debug!(property = %msg.property_name, "first event, subscription active");
            let _ = outcome.send(FirstEvent::Confirmed);
            deliveries.push((callback, msg.clone()));
        }
        deliveries
    }

    fn fail_pending(
        &mut self,
        message: &str,
    ) {
        let pending: Vec<String> = self
            .properties
            .iter()
            .filter(|(_, s)| matches!(s, PropertyState::PendingFirstSubscribe { .. }))
            .map(|(p, _)| p.clone())
            .collect();

        for property in pending {
            if let Some(PropertyState::PendingFirstSubscribe { outcome, .. }) = self.properties.remove(&property) {
                debug!(%property, %message, "existence error");
                let _ = outcome.send(FirstEvent::NoSuchProperty(message.to_string()));
            }
        }
    }

    pub(crate) fn last_message(
        &self,
        property: &str,
    ) -> Option<Message> {
        match self.properties.get(property) {
            Some(PropertyState::Active { last, .. }) => last.clone(),
            _ => None,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.properties.clear();
    }
}

pub(crate) struct SubscriptionRegistry {
    table: parking_lot::Mutex<SubscriptionTable>,
    gate: tokio::sync::Mutex<()>,
    correlator: Arc<RequestCorrelator>,
    dispatcher: Dispatcher,
}

impl SubscriptionRegistry {
    pub(crate) fn new(
        correlator: Arc<RequestCorrelator>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            table: parking_lot::Mutex::new(SubscriptionTable::default()),
            gate: tokio::sync::Mutex::new(()),
            correlator,
            dispatcher,
        }
    }

    /// Adds `callback` to `property`.
    ///
    /// Joining an active property never touches the wire; the callback is
    /// handed the cached last value, if any. Otherwise a REGISTER is sent.
    /// With [`SubscribeMode::Confirm`] the call returns `Ok(false)` if no
    /// event arrives in time, after undoing the registration.
    ///
    /// # Errors
    /// - [`ProtocolError::NoSuchProperty`] on a server existence error
    /// - transport errors from writing REGISTER
    pub(crate) async fn subscribe(
        &self,
        property: &str,
        callback: Callback,
        mode: SubscribeMode,
    ) -> Result<bool> {
        let _gate = self.gate.lock().await;

        let first = {
            let mut table = self.table.lock();
            if let Some(last) = table.join_active(property, &callback) {
                trace!(%property, "joined active subscription");
                if let Some(msg) = last {
                    self.dispatcher.deliver(&callback, msg);
                }
                return Ok(true);
            }
            match mode {
                SubscribeMode::FireAndForget => {
                    table.insert_active(property, callback);
                    None
                }
                SubscribeMode::Confirm(timeout) => Some((table.begin_first_subscribe(property, callback), timeout)),
            }
        };

        if let Err(e) = self
            .correlator
            .send(Request::register(property), None, ReplyWait::NoWait)
            .await
        {
            self.table.lock().forget(property);
            return Err(e);
        }

        let Some((mut outcome, timeout)) = first else {
            return Ok(true);
        };

        match tokio::time::timeout(timeout, &mut outcome).await {
            Ok(Ok(FirstEvent::Confirmed)) => {
                debug!(%property, "subscribed");
                Ok(true)
            }
            Ok(Ok(FirstEvent::NoSuchProperty(message))) => Err(ProtocolError::NoSuchProperty {
                property: property.to_string(),
                message,
            }
            .into()),
            Ok(Err(_)) => Err(Error::connection_closed()),
            Err(_) => self.expire(property, &mut outcome).await,
        }
    }

    async fn expire(
        &self,
        property: &str,
        outcome: &mut oneshot::Receiver<FirstEvent>,
    ) -> Result<bool> {
        let abandoned = self.table.lock().abandon_pending(property);
        match abandoned {
            Abandon::WasPending => {
                info!(%property, "no first event before timeout, unregistering");
                self.correlator
                    .send(Request::unregister(property), None, ReplyWait::NoWait)
                    .await?;
                Ok(false)
            }
            Abandon::AlreadyActive => Ok(true),
            Abandon::Gone => match outcome.try_recv() {
                Ok(FirstEvent::NoSuchProperty(message)) => Err(ProtocolError::NoSuchProperty {
                    property: property.to_string(),
                    message,
                }
                .into()),
                Ok(FirstEvent::Confirmed) => Ok(true),
                Err(_) => Err(Error::connection_closed()),
            },
        }
    }

    /// Removes one registration of `callback`. Returns false if it was not
    /// registered. The last removal sends UNREGISTER.
    pub(crate) async fn unsubscribe(
        &self,
        property: &str,
        callback: &Callback,
    ) -> Result<bool> {
        let _gate = self.gate.lock().await;

        let removal = self.table.lock().remove_callback(property, callback);
        match removal {
            Removal::NotFound => Ok(false),
            Removal::Removed => Ok(true),
            Removal::RemovedLast => {
                debug!(%property, "last subscriber gone, unregistering");
                self.correlator
                    .send(Request::unregister(property), None, ReplyWait::NoWait)
                    .await?;
                Ok(true)
            }
        }
    }

    /// Receive-loop entry point for every pushed event.
    pub(crate) fn on_event(
        &self,
        msg: &Message,
    ) {
        let deliveries = self.table.lock().on_event(msg);
        for (callback, msg) in deliveries {
            self.dispatcher.deliver(&callback, msg);
        }
    }

    pub(crate) fn last_message(
        &self,
        property: &str,
    ) -> Option<Message> {
        self.table.lock().last_message(property)
    }

    pub(crate) fn phase(
        &self,
        property: &str,
    ) -> PropertyPhase {
        self.table.lock().phase(property)
    }

    /// Drops all subscriptions. Pending subscribers see a closed connection.
    pub(crate) fn fail_all(&self) {
        let mut table = self.table.lock();
        if !table.properties.is_empty() {
            warn!(n = table.properties.len(), "dropping subscriptions");
        }
        table.clear();
    }
}
