//! # Liveness Probe
//!
//! A cheap request against the companion API issued before connecting to the
//! broker. The result is informational: callers log a failure and carry on.

use async_trait::async_trait;
use tracing::debug;

use super::ky_http::ApiClient;
use crate::configs::BroadcastConfig;
use crate::error::{BroadcastError, BroadcastResult};

/// Something that can tell whether the companion service is reachable.
#[async_trait]
pub trait LivenessProbe: Send + Sync + 'static {
    /// Returns the opaque response body on success.
    async fn check(&self) -> BroadcastResult<String>;
}

/// `GET {server_url}/{path}` through the retrying [`ApiClient`].
pub struct HttpProbe {
    client: ApiClient,
    path: String,
}

impl HttpProbe {
    /// Probes `path` relative to `server_url`, retrying transient failures `retries` times.
    pub fn new(server_url: &str, path: &str, retries: u32) -> BroadcastResult<Self> {
        let client = ApiClient::new(server_url, None, retries).map_err(|e| BroadcastError::Probe(e.to_string()))?;
        Ok(Self {
            client,
            path: path.trim_start_matches('/').to_string(),
        })
    }

    /// Builds the probe from the resolved configuration.
    pub fn from_config(config: &BroadcastConfig) -> BroadcastResult<Self> {
        Self::new(&config.server_url, &config.probe_path, config.probe_retries)
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn check(&self) -> BroadcastResult<String> {
        let res = self
            .client
            .get_text(&self.path)
            .await
            .map_err(|e| BroadcastError::Probe(e.to_string()))?;

        if !res.success {
            return Err(BroadcastError::Probe(format!(
                "status {}: {}",
                res.status,
                res.error_body.unwrap_or_default()
            )));
        }
        debug!(status = res.status, path = %self.path, "Liveness probe answered");
        Ok(res.data.unwrap_or_default())
    }
}

/// A probe that always succeeds without touching the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProbe;

#[async_trait]
impl LivenessProbe for NoopProbe {
    async fn check(&self) -> BroadcastResult<String> {
        Ok(String::new())
    }
}
