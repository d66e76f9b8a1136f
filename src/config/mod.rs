//! Configuration management for the client engine.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Section-wise validation
mod dispatch;
mod network;
mod timeouts;
pub use dispatch::*;
pub use network::*;
pub use timeouts::*;
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Prefix for environment overrides, e.g. `CERTIF__NETWORK__PORT=6511`.
pub(crate) const ENV_PREFIX: &str = "CERTIF";

/// Main configuration container for one client connection
///
/// Combines all section configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ClientConfig {
    /// Server address and socket parameters
    #[serde(default)]
    pub network: NetworkConfig,
    /// Wait bounds for subscribe, read and write
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Callback execution limits
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Console output capture
    #[serde(default)]
    pub console: ConsoleConfig,
}

impl ClientConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `CERTIF__` prefix (highest priority)
    ///
    /// Callers MUST call `validate()` before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CERTIF__NETWORK__PORT", "6512");
    /// let cfg = ClientConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.network.validate()?;
        self.timeouts.validate()?;
        self.dispatch.validate()?;
        Ok(self)
    }
}

/// Console capture settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConsoleConfig {
    /// Keep a standing `output/tty` subscription so `run` can return
    /// what the command printed
    #[serde(default = "default_capture")]
    pub capture: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            capture: default_capture(),
        }
    }
}

fn default_capture() -> bool {
    true
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
