use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Caller-side wait bounds. None of these cancel the server request; a reply
/// arriving after its deadline is dropped.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// How long a first subscribe waits for either the first event or an
    /// existence error
    #[serde(default = "default_subscribe_timeout")]
    pub subscribe_timeout_in_ms: u64,

    /// How long an uncached `get` waits for the read reply
    #[serde(default = "default_read_timeout")]
    pub read_timeout_in_ms: u64,

    /// How long `set` waits for an error reply. The server only answers
    /// writes that fail, so 0 means never check.
    #[serde(default = "default_write_error_wait")]
    pub write_error_wait_in_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            subscribe_timeout_in_ms: default_subscribe_timeout(),
            read_timeout_in_ms: default_read_timeout(),
            write_error_wait_in_ms: default_write_error_wait(),
        }
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.subscribe_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "timeouts.subscribe_timeout_in_ms must be > 0".into(),
            )));
        }
        if self.read_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "timeouts.read_timeout_in_ms must be > 0".into(),
            )));
        }
        Ok(())
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_in_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_in_ms)
    }

    pub fn write_error_wait(&self) -> Duration {
        Duration::from_millis(self.write_error_wait_in_ms)
    }
}

fn default_subscribe_timeout() -> u64 {
    100
}
fn default_read_timeout() -> u64 {
    500
}
fn default_write_error_wait() -> u64 {
    100
}
