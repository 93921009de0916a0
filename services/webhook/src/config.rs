use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use holdgate_resource::HoldMarker;

/// Default hold marker identifier.
pub const DEFAULT_MARKER: &str = "mcaq.me/test-gate";

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// Marker attached to admitted workloads.
    pub marker: HoldMarker,
    /// Gate release push endpoint.
    pub gate_release_url: String,
    /// Whole-request timeout for the hand-off; keep it well inside the
    /// platform's admission timeout.
    pub forward_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("HOLDGATE_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8443".to_string())
            .parse::<SocketAddr>()
            .context("invalid HOLDGATE_LISTEN_ADDR")?;

        let log_level = std::env::var("HOLDGATE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let marker = std::env::var("HOLDGATE_MARKER")
            .unwrap_or_else(|_| DEFAULT_MARKER.to_string())
            .parse::<HoldMarker>()
            .context("invalid HOLDGATE_MARKER")?;

        let gate_release_url = std::env::var("HOLDGATE_GATE_RELEASE_URL")
            .unwrap_or_else(|_| "http://dockerhost:4242/api/pod".to_string());

        let forward_timeout_ms: u64 = std::env::var("HOLDGATE_FORWARD_TIMEOUT_MS")
            .ok()
            .map(|s| s.parse::<u64>())
            .transpose()
            .context("invalid HOLDGATE_FORWARD_TIMEOUT_MS")?
            .unwrap_or(5000);

        Ok(Self {
            listen_addr,
            log_level,
            marker,
            gate_release_url,
            forward_timeout: Duration::from_millis(forward_timeout_ms),
        })
    }
}
