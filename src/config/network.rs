use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::SV_HEADER_SIZE;
use crate::Error;
use crate::Result;

/// Socket parameters for the single long-lived server connection
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Server host name or address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (the server listens somewhere in 6510..=6530)
    #[serde(default = "default_port")]
    pub port: u16,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// Disable Nagle so small request frames go out immediately
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,

    /// Largest accepted frame body in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_in_ms: default_connect_timeout(),
            tcp_nodelay: default_tcp_nodelay(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "network.host cannot be empty".into(),
            )));
        }

        if self.port == 0 {
            return Err(Error::Config(ConfigError::Message(
                "network.port must be non-zero".into(),
            )));
        }

        if self.connect_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "network.connect_timeout_in_ms must be > 0".into(),
            )));
        }

        if self.max_frame_size < SV_HEADER_SIZE {
            return Err(Error::Config(ConfigError::Message(format!(
                "network.max_frame_size {} below header size {}",
                self.max_frame_size, SV_HEADER_SIZE
            ))));
        }

        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    6510
}
fn default_connect_timeout() -> u64 {
    1000
}
fn default_tcp_nodelay() -> bool {
    true
}
fn default_max_frame_size() -> usize {
    16 * 1024 * 1024
}
