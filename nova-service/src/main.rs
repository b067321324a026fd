//! Nova Worker Entry Point
//!
//! Opens the persistent artifact store and owns the cache cleanup scheduler
//! for the lifetime of the process: started on boot, stopped on Ctrl-C.

use std::sync::Arc;

use nova_core::{NovaError, NovaResult};
use nova_service::telemetry::{init_tracing, TelemetryConfig};
use nova_service::{CleanupScheduler, LmdbStore, NovaConfig};

#[tokio::main]
async fn main() -> NovaResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let config = NovaConfig::from_env();
    config.validate()?;

    let store = Arc::new(
        LmdbStore::open(&config.store_path, config.store_max_size_mb).map_err(NovaError::from)?,
    );
    tracing::info!(
        store_path = %config.store_path.display(),
        retention_secs = config.cleanup.retention.as_secs(),
        "Starting Nova worker"
    );

    let scheduler = CleanupScheduler::new(store, config.cleanup.clone());
    scheduler.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    } else {
        tracing::info!("Shutdown signal received");
    }

    scheduler.stop().await;
    let status = scheduler.status();
    tracing::info!(
        sweeps = status.totals.sweeps,
        entries_deleted = status.totals.entries_deleted,
        "Nova worker stopped"
    );
    Ok(())
}
