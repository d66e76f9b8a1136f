//! Timed counting across all configured scaler channels.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::warn;

use super::Callback;
use super::Client;
use super::Dispatcher;
use crate::constants::scaler_value_property;
use crate::constants::variable_property;
use crate::constants::COUNTERS_VARIABLE;
use crate::constants::STOP_COUNTING_PROPERTY;
use crate::Message;
use crate::ProtocolError;
use crate::Result;

/// Counter mnemonic to latest value.
pub type CounterSnapshot = BTreeMap<String, f64>;

/// Receives the full snapshot after each streamed counter update.
pub type ProgressCallback = Arc<dyn Fn(CounterSnapshot) + Send + Sync>;

/// One scaler channel as configured on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterInfo {
    /// Short name used in property paths, e.g. `sec`
    pub mnemonic: String,
    /// Human readable name, e.g. `Seconds`
    pub name: String,
}

/// Shared state of one `count` invocation.
struct CountRun {
    values: parking_lot::Mutex<CounterSnapshot>,
    done: AtomicBool,
    progress: Option<ProgressCallback>,
    dispatcher: Dispatcher,
}

impl CountRun {
    fn new(
        counters: &[CounterInfo],
        progress: Option<ProgressCallback>,
        dispatcher: Dispatcher,
    ) -> Self {
        let values = counters.iter().map(|c| (c.mnemonic.clone(), 0.0)).collect();
        Self {
            values: parking_lot::Mutex::new(values),
            done: AtomicBool::new(false),
            progress,
            dispatcher,
        }
    }

    fn on_value(
        &self,
        msg: &Message,
    ) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        // scaler/<mnemonic>/value
        let Some(mnemonic) = msg.property_name.split('/').nth(1) else {
            return;
        };
        let Some(value) = msg.body_f64() else {
            warn!(property = %msg.property_name, body = %msg.body_str(), "non-numeric counter value");
            return;
        };

        let snapshot = {
            let mut values = self.values.lock();
            match values.get_mut(mnemonic) {
                Some(slot) => *slot = value,
                None => return,
            }
            values.clone()
        };
        self.report(snapshot);
    }

    /// Hands `snapshot` to the progress callback, if there is one.
    fn report(
        &self,
        snapshot: CounterSnapshot,
    ) {
        if let Some(progress) = &self.progress {
            let progress = progress.clone();
            self.dispatcher.submit(move || progress(snapshot));
        }
    }

    /// Stops accepting pushes and returns what streamed in so far.
    fn finish(&self) -> CounterSnapshot {
        self.done.store(true, Ordering::Release);
        self.values.lock().clone()
    }
}

impl Client {
    /// Lists the configured counters, loading them from the server on first
    /// use or when `refresh` is set.
    pub async fn counter_names(
        &self,
        refresh: bool,
    ) -> Result<Vec<CounterInfo>> {
        let cached = self.inner.counters.lock().clone();
        if let (false, Some(counters)) = (refresh, cached) {
            return Ok(counters);
        }

        let counters = self.load_counter_names().await?;
        *self.inner.counters.lock() = Some(counters.clone());
        Ok(counters)
    }

    async fn load_counter_names(&self) -> Result<Vec<CounterInfo>> {
        let property = variable_property(COUNTERS_VARIABLE);
        let reply = self
            .read_from_server(&property)
            .await?
            .ok_or_else(|| ProtocolError::InvalidValue {
                property: property.clone(),
                body: String::new(),
            })?;
        let body = reply.body_str();
        let n = body
            .trim()
            .parse::<usize>()
            .map_err(|_| ProtocolError::InvalidValue {
                property: property.clone(),
                body: body.clone(),
            })?;

        let mut counters = Vec::new();
        for i in 0..n {
            let (mnemonic, _) = self.run(&format!("cnt_mne({i})")).await?;
            let (name, _) = self.run(&format!("cnt_name({i})")).await?;
            counters.push(CounterInfo {
                mnemonic: mnemonic.body_str(),
                name: name.body_str(),
            });
        }
        debug!(?counters, "counter names loaded");
        Ok(counters)
    }

    /// Counts for `duration` and returns the final value of every counter.
    ///
    /// While counting, each counter's value channel is subscribed and
    /// `progress` sees a full snapshot after every pushed update. Once the
    /// count command returns, each channel is read once more from the server
    /// and that read wins over anything pushed before it.
    pub async fn count(
        &self,
        duration: Duration,
        progress: Option<ProgressCallback>,
        refresh_names: bool,
    ) -> Result<CounterSnapshot> {
        let counters = self.counter_names(refresh_names).await?;
        let run = Arc::new(CountRun::new(&counters, progress, self.inner.dispatcher.clone()));
        let callback = {
            let run = run.clone();
            Callback::new(move |msg: Message| run.on_value(&msg))
        };

        let subscribed = self.subscribe_counters(&counters, &callback).await?;

        let counted = self.run(&format!("count {}", duration.as_secs_f64())).await;
        let mut snapshot = run.finish();

        let mut result = counted.map(|_| ());
        for counter in &counters {
            if result.is_err() {
                break;
            }
            let property = scaler_value_property(&counter.mnemonic);
            result = self.final_read(&property, &counter.mnemonic, &mut snapshot).await;
        }
        self.release_counters(&subscribed, &callback).await;

        result?;
        run.report(snapshot.clone());
        Ok(snapshot)
    }

    /// Subscribes `callback` to every counter's value channel. On failure
    /// the channels subscribed so far are released before returning.
    async fn subscribe_counters(
        &self,
        counters: &[CounterInfo],
        callback: &Callback,
    ) -> Result<Vec<String>> {
        let mut subscribed = Vec::with_capacity(counters.len());
        for counter in counters {
            let property = scaler_value_property(&counter.mnemonic);
            match self.subscribe(&property, callback.clone()).await {
                Ok(true) => subscribed.push(property),
                Ok(false) => warn!(%property, "no initial counter value"),
                Err(e) => {
                    self.release_counters(&subscribed, callback).await;
                    return Err(e);
                }
            }
        }
        Ok(subscribed)
    }

    async fn release_counters(
        &self,
        properties: &[String],
        callback: &Callback,
    ) {
        for property in properties {
            if let Err(e) = self.unsubscribe(property, callback).await {
                warn!(%property, error = %e, "unsubscribe after count failed");
            }
        }
    }

    async fn final_read(
        &self,
        property: &str,
        mnemonic: &str,
        snapshot: &mut CounterSnapshot,
    ) -> Result<()> {
        match self.read_from_server(property).await? {
            Some(msg) if !msg.reports_error() => match msg.body_f64() {
                Some(value) => {
                    snapshot.insert(mnemonic.to_string(), value);
                }
                None => warn!(%property, body = %msg.body_str(), "non-numeric final counter value"),
            },
            Some(msg) => warn!(%property, error = %msg.body_str(), "final counter read failed"),
            None => warn!(%property, "final counter read timed out"),
        }
        Ok(())
    }

    /// Asks the server to stop any count in progress.
    pub async fn stop_counting(&self) -> Result<()> {
        self.set(STOP_COUNTING_PROPERTY, "0").await
    }
}
