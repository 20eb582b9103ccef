use anyhow::{Context, Result};
use clap::Args;
use lib_broadcast::BroadcastConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file read when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "broadcast.conf";

#[derive(Args, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "BROADCAST_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "BROADCAST_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "BROADCAST_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "BROADCAST_SERVER_URL", help = "Base URL of the companion API (liveness probe).")]
    pub server_url: Option<String>,

    #[clap(long, env = "BROADCAST_URL", help = "WebSocket URL of the broker.")]
    pub broadcast_url: Option<String>,

    #[clap(long, env = "BROADCAST_PROBE_PATH", help = "Liveness endpoint path relative to the server URL.")]
    pub probe_path: Option<String>,

    #[clap(long, env = "BROADCAST_PROBE_ENABLED", help = "Run the liveness probe before connecting.")]
    pub probe_enabled: Option<bool>,

    #[clap(long, env = "BROADCAST_PROBE_RETRIES", help = "Retries for transient probe failures.")]
    pub probe_retries: Option<u32>,

    #[clap(long, env = "BROADCAST_CONNECT_TIMEOUT_MS", help = "Broker handshake timeout in milliseconds.")]
    pub connect_timeout_ms: Option<u64>,

    #[clap(long, env = "BROADCAST_CLIENT_NAME", help = "Connection name reported to the broker.")]
    pub client_name: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            server_url: other.server_url.or(self.server_url),
            broadcast_url: other.broadcast_url.or(self.broadcast_url),
            probe_path: other.probe_path.or(self.probe_path),
            probe_enabled: other.probe_enabled.or(self.probe_enabled),
            probe_retries: other.probe_retries.or(self.probe_retries),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            client_name: other.client_name.or(self.client_name),
        }
    }

    fn defaults(app_name: &str) -> Config {
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            server_url: Some("http://localhost:8000/".to_string()),
            broadcast_url: Some("ws://localhost:8080".to_string()),
            probe_path: Some("health".to_string()),
            probe_enabled: Some(true),
            probe_retries: Some(0),
            connect_timeout_ms: Some(10_000),
            client_name: Some(app_name.to_string()),
            ..Default::default()
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".to_string())
    }

    /// Validated library configuration.
    pub fn to_broadcast_config(&self) -> Result<BroadcastConfig> {
        let server_url = self.server_url.clone().context("server URL is not set")?;
        let broadcast_url = self.broadcast_url.clone().context("broker URL is not set")?;

        let mut config = BroadcastConfig::new(server_url, broadcast_url)?;
        if let Some(path) = &self.probe_path {
            config.probe_path = path.trim_start_matches('/').to_string();
        }
        if let Some(enabled) = self.probe_enabled {
            config.probe_enabled = enabled;
        }
        if let Some(retries) = self.probe_retries {
            config.probe_retries = retries;
        }
        if let Some(timeout) = self.connect_timeout_ms {
            config.connect_timeout_ms = timeout;
        }
        if let Some(name) = &self.client_name {
            config.client_name = name.clone();
        }
        Ok(config)
    }
}

/// Resolves the configuration: defaults, then the JSON config file, then
/// environment variables and CLI arguments (already folded into `cli` by clap).
pub fn load_config(app_name: &str, cli: Config) -> Result<Config> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults(app_name);
    if let Some(file_config) = read_config_file(&config_file_path)? {
        current_config = current_config.merge(file_config);
    }
    Ok(current_config.merge(cli))
}

/// `Ok(None)` when the file does not exist.
fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let config_str =
        fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let file_config = serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(Some(file_config))
}
