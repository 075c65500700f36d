//! Tally Service - credit ledger and metered usage billing API.
//!
//! This is the main entry point for the tally service.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_meter::{HttpMeterClient, MeterProvider, MeterWorker, WorkerConfig};
use tally_service::{create_router, AppState, ReconcileScheduler, Reconciler, ServiceConfig};
use tally_store::{RocksStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tally=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tally Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        meter_configured = %config.meter_api_url.is_some(),
        meter_mode = ?config.meter_mode,
        "Service configuration loaded"
    );

    // Initialize RocksDB store
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    let store: Arc<dyn Store> = Arc::new(RocksStore::open(&config.data_dir)?);

    // Build app state
    let mut state = AppState::new(Arc::clone(&store), config.clone());

    // Start the delivery worker if a provider is configured
    let worker = match config.meter_api_url.as_ref().zip(config.meter_api_key.as_ref()) {
        Some((url, key)) => {
            tracing::info!(meter_url = %url, "Metering provider enabled");
            let provider: Arc<dyn MeterProvider> = Arc::new(HttpMeterClient::new(url, key)?);
            let worker = MeterWorker::spawn(
                Arc::clone(&store),
                provider,
                WorkerConfig::for_mode(config.meter_mode),
            )?;
            state = state.with_worker_liveness(worker.liveness_handle());
            Some(worker)
        }
        None => {
            tracing::warn!("Metering provider not configured - meter events will not be delivered");
            None
        }
    };

    // Start the reconciliation schedule
    let reconciler = Reconciler::new(
        Arc::clone(&store),
        state.queue.clone(),
        state.ledger.clone(),
    );
    let scheduler = ReconcileScheduler::spawn(
        reconciler,
        Duration::from_secs(config.reconcile_interval_seconds),
    );

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain background work before exiting
    scheduler.shutdown().await;
    if let Some(worker) = worker {
        tracing::info!("Draining meter worker");
        worker.shutdown().await;
    }

    tracing::info!("Tally Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
