use std::net::SocketAddr;

use anyhow::{Context, Result};
use holdgate_store::HttpStoreConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub store: HttpStoreConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("HOLDGATE_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:4242".to_string())
            .parse::<SocketAddr>()
            .context("invalid HOLDGATE_LISTEN_ADDR")?;

        let log_level = std::env::var("HOLDGATE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let store = HttpStoreConfig::from_env()?;

        Ok(Self {
            listen_addr,
            log_level,
            store,
        })
    }
}
