use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Upper bound on callbacks running at the same time. Further
    /// deliveries queue up; the receive loop never waits on them.
    #[serde(default = "default_max_concurrent_callbacks")]
    pub max_concurrent_callbacks: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_callbacks: default_max_concurrent_callbacks(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_callbacks == 0 {
            return Err(Error::Config(ConfigError::Message(
                "dispatch.max_concurrent_callbacks must be > 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_max_concurrent_callbacks() -> usize {
    64
}
