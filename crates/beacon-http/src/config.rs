//! Server configuration
//!
//! Durations are written the human way (`"5s"`, `"250ms"`); any field left out
//! of a config document takes its default.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use beacon_core::{BeaconError, BeaconResult};

/// HTTP server configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bound on every direct upstream call
    #[serde(deserialize_with = "human_duration")]
    pub request_timeout: Duration,
    /// How long a request for the next round may stay parked
    #[serde(deserialize_with = "human_duration")]
    pub next_round_timeout: Duration,
    /// Pause before reopening a failed upstream stream
    #[serde(deserialize_with = "human_duration")]
    pub reconnect_delay: Duration,
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            request_timeout: Duration::from_secs(5),
            next_round_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(1),
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_json(json: &str) -> BeaconResult<Self> {
        serde_json::from_str(json).map_err(|e| BeaconError::InvalidConfig(e.to_string()))
    }
}

/// Log output configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn human_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}
