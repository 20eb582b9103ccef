//! # Broadcast Configuration
//!
//! Where the companion API and the broker live, and how hard to try reaching
//! them. Values resolve from explicit arguments first, then from the
//! environment (a `.env` file is honoured through `dotenvy`), then from
//! defaults for the optional keys.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Base URL of the companion HTTP API (hosts the liveness endpoint).
pub const ENV_SERVER_URL: &str = "BROADCAST_SERVER_URL";
/// WebSocket URL of the broker.
pub const ENV_BROADCAST_URL: &str = "BROADCAST_URL";
/// Path of the liveness endpoint, relative to the server URL.
pub const ENV_PROBE_PATH: &str = "BROADCAST_PROBE_PATH";
/// Whether to run the liveness probe at all.
pub const ENV_PROBE_ENABLED: &str = "BROADCAST_PROBE_ENABLED";
/// Transient-failure retries for the probe request.
pub const ENV_PROBE_RETRIES: &str = "BROADCAST_PROBE_RETRIES";
/// Broker handshake timeout in milliseconds.
pub const ENV_CONNECT_TIMEOUT_MS: &str = "BROADCAST_CONNECT_TIMEOUT_MS";
/// Connection name reported to the broker.
pub const ENV_CLIENT_NAME: &str = "BROADCAST_CLIENT_NAME";

/// Errors raised while resolving configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A URL value does not parse or uses the wrong scheme.
    #[error("Invalid URL in {key} ('{value}'): {reason}")]
    InvalidUrl {
        /// Setting name.
        key: String,
        /// Offending value.
        value: String,
        /// Parse or scheme error.
        reason: String,
    },

    /// A numeric or boolean value does not parse.
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Resolved settings for probing and connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Companion API base URL, e.g. `http://localhost:8000/`.
    pub server_url: String,
    /// Broker WebSocket URL, e.g. `ws://localhost:8080`.
    pub broadcast_url: String,
    /// Liveness endpoint path.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    /// Run the probe before connecting.
    #[serde(default = "default_probe_enabled")]
    pub probe_enabled: bool,
    /// Retries for transient probe failures.
    #[serde(default)]
    pub probe_retries: u32,
    /// Broker handshake timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Connection name reported to the broker.
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

fn default_probe_path() -> String {
    "health".to_string()
}

fn default_probe_enabled() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_client_name() -> String {
    "lib_broadcast".to_string()
}

impl BroadcastConfig {
    /// Builds a validated configuration with defaults for every optional key.
    pub fn new(server_url: impl Into<String>, broadcast_url: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            server_url: server_url.into(),
            broadcast_url: broadcast_url.into(),
            probe_path: default_probe_path(),
            probe_enabled: default_probe_enabled(),
            probe_retries: 0,
            connect_timeout_ms: default_connect_timeout_ms(),
            client_name: default_client_name(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads `.env` if present, then resolves from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolves every setting through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let mut config = Self::new(required(ENV_SERVER_URL)?, required(ENV_BROADCAST_URL)?)?;

        if let Some(path) = lookup(ENV_PROBE_PATH) {
            config.probe_path = path.trim().trim_start_matches('/').to_string();
        }
        if let Some(raw) = lookup(ENV_PROBE_ENABLED) {
            config.probe_enabled = parse_bool(ENV_PROBE_ENABLED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_PROBE_RETRIES) {
            config.probe_retries = parse_number(ENV_PROBE_RETRIES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout_ms = parse_number(ENV_CONNECT_TIMEOUT_MS, &raw)?;
        }
        if let Some(name) = lookup(ENV_CLIENT_NAME) {
            config.client_name = name.trim().to_string();
        }

        Ok(config)
    }

    /// Checks that both URLs parse and use the expected schemes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url(ENV_SERVER_URL, &self.server_url, &["http", "https"])?;
        check_url(ENV_BROADCAST_URL, &self.broadcast_url, &["ws", "wss"])?;
        Ok(())
    }

    /// Broker handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn check_url(key: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    if !schemes.contains(&url.scheme()) {
        return Err(invalid(format!("expected one of {schemes:?}, got '{}'", url.scheme())));
    }
    Ok(())
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
