use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::Callback;
use super::Client;
use super::ReplyWait;
use crate::DataType;
use crate::Error;
use crate::Message;
use crate::MisuseError;
use crate::ProtocolError;
use crate::Request;
use crate::Result;

#[derive(Debug)]
struct WatchEntry {
    callback: Callback,
    value: Option<Message>,
}

/// Local mirror of watched properties, kept current by subscription pushes.
#[derive(Debug, Default)]
pub(crate) struct WatchCache {
    entries: Arc<DashMap<String, WatchEntry>>,
}

impl WatchCache {
    /// Creates the entry and returns the callback that keeps it current.
    fn insert(
        &self,
        property: &str,
    ) -> Result<Callback> {
        let entries = self.entries.clone();
        let key = property.to_string();
        let callback = Callback::inline(move |msg: Message| {
            if let Some(mut entry) = entries.get_mut(&key) {
                entry.value = Some(msg);
            }
        });

        match self.entries.entry(property.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(MisuseError::AlreadyWatched(property.to_string()).into()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(WatchEntry {
                    callback: callback.clone(),
                    value: None,
                });
                Ok(callback)
            }
        }
    }

    /// Fills the value if no push has landed yet.
    fn prime(
        &self,
        property: &str,
        last: Option<Message>,
    ) {
        if let Some(mut entry) = self.entries.get_mut(property) {
            if entry.value.is_none() {
                entry.value = last;
            }
        }
    }

    fn remove(
        &self,
        property: &str,
    ) -> Option<Callback> {
        self.entries.remove(property).map(|(_, e)| e.callback)
    }

    pub(crate) fn cached(
        &self,
        property: &str,
    ) -> Option<Message> {
        self.entries.get(property).and_then(|e| e.value.clone())
    }

    pub(crate) fn is_watched(
        &self,
        property: &str,
    ) -> bool {
        self.entries.contains_key(property)
    }

    /// Applies a successful local write so a following read sees it.
    fn record_write(
        &self,
        property: &str,
        value: &str,
    ) {
        if let Some(mut entry) = self.entries.get_mut(property) {
            match entry.value.as_mut() {
                Some(msg) => msg.body = value.as_bytes().to_vec(),
                None => entry.value = Some(Message::event(property, DataType::String, value)),
            }
        }
    }
}

impl Client {
    /// Keeps a local copy of `property` current so [`Client::get`] can
    /// answer without a round trip.
    ///
    /// Returns `Ok(false)` if the subscription timed out; nothing is left
    /// watched in that case.
    ///
    /// # Errors
    /// - [`MisuseError::AlreadyWatched`] if `property` is already watched
    /// - [`ProtocolError::NoSuchProperty`] on a server existence error
    pub async fn watch(
        &self,
        property: &str,
    ) -> Result<bool> {
        let watches = &self.inner.watches;
        let callback = watches.insert(property)?;

        match self.subscribe(property, callback).await {
            Ok(true) => {
                watches.prime(property, self.inner.registry.last_message(property));
                debug!(%property, "watching");
                Ok(true)
            }
            other => {
                watches.remove(property);
                other
            }
        }
    }

    /// Stops watching `property`.
    ///
    /// # Errors
    /// - [`MisuseError::NotWatched`] if `property` is not watched
    pub async fn unwatch(
        &self,
        property: &str,
    ) -> Result<()> {
        let callback = self
            .inner
            .watches
            .remove(property)
            .ok_or_else(|| MisuseError::NotWatched(property.to_string()))?;
        self.unsubscribe(property, &callback).await?;
        Ok(())
    }

    pub fn is_watched(
        &self,
        property: &str,
    ) -> bool {
        self.inner.watches.is_watched(property)
    }

    /// Reads `property`, from the watch cache when possible.
    ///
    /// Returns `Ok(None)` if the server did not answer within the read
    /// timeout.
    ///
    /// # Errors
    /// - [`TransportError::ConnectionClosed`](crate::TransportError::ConnectionClosed)
    ///   once the connection is gone, even for watched properties
    pub async fn get(
        &self,
        property: &str,
    ) -> Result<Option<Message>> {
        self.ensure_connected()?;
        if let Some(msg) = self.inner.watches.cached(property) {
            return Ok(Some(msg));
        }
        self.read_from_server(property).await
    }

    /// Always goes to the server, ignoring the watch cache.
    pub(crate) async fn read_from_server(
        &self,
        property: &str,
    ) -> Result<Option<Message>> {
        let timeout = self.inner.config.timeouts.read_timeout();
        self.request(Request::chan_read(property), None, ReplyWait::Timeout(timeout))
            .await
    }

    /// Writes `value` to `property`.
    ///
    /// The server only answers a write when it fails, so this waits the
    /// configured write-error window for such an answer. Silence means
    /// success.
    ///
    /// # Errors
    /// - [`ProtocolError::Rejected`] when the server reports an error
    pub async fn set(
        &self,
        property: &str,
        value: &str,
    ) -> Result<()> {
        self.ensure_connected()?;
        let wait = ReplyWait::Timeout(self.inner.config.timeouts.write_error_wait());
        let reply = self
            .request(Request::chan_send(property, value), None, wait)
            .await?;

        if let Some(reply) = reply {
            if reply.reports_error() {
                return Err(Error::Protocol(ProtocolError::Rejected {
                    property: property.to_string(),
                    message: reply.body_str(),
                }));
            }
        }

        self.inner.watches.record_write(property, value);
        Ok(())
    }
}
