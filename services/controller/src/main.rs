//! holdgate controller
//!
//! Watches workloads and releases held ones after the configured delay.

use std::sync::Arc;

use anyhow::Result;
use holdgate_controller::{config, Reconciler};
use holdgate_store::HttpStore;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting holdgate controller");
    info!(
        store_url = %config.store.base_url,
        namespace = config.store.namespace.as_deref().unwrap_or("*"),
        resync_interval_secs = config.store.resync_interval.as_secs(),
        release_delay_secs = config.reconciler.release_delay.as_secs(),
        max_attempts = config.reconciler.retry.max_attempts,
        dedup = config.reconciler.dedup,
        "Configuration loaded"
    );

    let store = HttpStore::new(config.store.clone())?;
    let reconciler = Reconciler::new(Arc::new(store), config.reconciler.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker = tokio::spawn(async move { reconciler.run(shutdown_rx).await });

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            // Pending checks are dropped with the runtime; the next start resyncs.
            let _ = shutdown_tx.send(true);
            worker.await
        }
        finished = &mut worker => finished,
    };

    match finished {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Reconciler failed"),
        Err(e) => error!(error = %e, "Reconciler task panicked"),
    }

    info!("Controller shutdown complete");
    Ok(())
}
