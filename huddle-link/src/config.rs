//! Client configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it wants
//! to override:
//! ```json
//! { "host": "live.example.com", "backoff": { "cap_ms": 30000 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;

/// Connection manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Realtime host, optionally with port.
    pub host: String,
    /// `wss` when true, plain `ws` otherwise.
    pub secure: bool,
    pub backoff: BackoffConfig,
    /// Outgoing queue capacity; overflow drops the oldest frame.
    pub queue_capacity: usize,
    pub watchdog_interval_ms: u64,
    pub keepalive_interval_ms: u64,
    /// An open attempt still pending after this long counts as failed.
    pub connect_timeout_ms: u64,
    /// Per-subscriber buffer of the event relay.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8080".to_string(),
            secure: true,
            backoff: BackoffConfig::default(),
            queue_capacity: 300,
            watchdog_interval_ms: 14_000,
            keepalive_interval_ms: 20_000,
            connect_timeout_ms: 10_000,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_json_str(&text)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Configuration loading errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "Config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
