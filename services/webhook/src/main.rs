//! holdgate admission webhook
//!
//! Invoked by the platform on every workload creation. Hands a snapshot of
//! the workload to the gate release service and answers with a patch that
//! attaches the hold marker. TLS is terminated in front of this process.

use std::sync::Arc;

use anyhow::Result;
use holdgate_webhook::{api, config, state::AppState, HttpForwarder, Interceptor};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to HOLDGATE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting holdgate webhook");
    info!(
        listen_addr = %config.listen_addr,
        marker = %config.marker,
        gate_release_url = %config.gate_release_url,
        forward_timeout_ms = config.forward_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    let forwarder = HttpForwarder::new(config.gate_release_url.clone(), config.forward_timeout)?;
    let interceptor = Interceptor::new(config.marker.clone(), Arc::new(forwarder));
    let app = api::create_router(AppState::new(interceptor));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await;

    if let Err(e) = &result {
        error!(error = %e, "Server error");
    }
    result?;

    info!("Webhook shutdown complete");
    Ok(())
}
