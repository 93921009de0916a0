//! holdgate gate release service
//!
//! Receives workload snapshots from the webhook, answers with the workload spec
//! stripped of hold markers, and attempts one background write-back.

use std::sync::Arc;

use anyhow::Result;
use holdgate_gate_release::{api, config, state::AppState, GateRelease};
use holdgate_store::HttpStore;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting holdgate gate release");
    info!(
        listen_addr = %config.listen_addr,
        store_url = %config.store.base_url,
        "Configuration loaded"
    );

    let store = HttpStore::new(config.store.clone())?;
    let app = api::create_router(AppState::new(GateRelease::new(Arc::new(store))));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await
    {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Gate release shutdown complete");
    Ok(())
}
