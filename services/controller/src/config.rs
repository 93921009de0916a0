use std::time::Duration;

use anyhow::{bail, Context, Result};
use holdgate_reconcile::{
    RetryPolicy, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF,
};
use holdgate_store::HttpStoreConfig;

use crate::reconciler::ReconcilerConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub store: HttpStoreConfig,
    pub reconciler: ReconcilerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_level = std::env::var("HOLDGATE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let store = HttpStoreConfig::from_env()?;

        // Required; there is no default wait.
        let release_delay = std::env::var("HOLDGATE_RELEASE_DELAY_SECS")
            .context("HOLDGATE_RELEASE_DELAY_SECS is required")?
            .parse::<u64>()
            .map(Duration::from_secs)
            .context("invalid HOLDGATE_RELEASE_DELAY_SECS")?;

        let max_attempts = match std::env::var("HOLDGATE_RELEASE_MAX_ATTEMPTS") {
            Ok(raw) => raw
                .parse::<u32>()
                .context("invalid HOLDGATE_RELEASE_MAX_ATTEMPTS")?,
            Err(_) => DEFAULT_MAX_ATTEMPTS,
        };
        let retry = RetryPolicy::bounded(max_attempts, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF);
        retry.validate()?;

        let dedup = match std::env::var("HOLDGATE_RELEASE_DEDUP") {
            Ok(raw) => parse_bool(&raw).context("invalid HOLDGATE_RELEASE_DEDUP")?,
            Err(_) => false,
        };

        Ok(Self {
            log_level,
            store,
            reconciler: ReconcilerConfig {
                release_delay,
                retry,
                dedup,
            },
        })
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}
