//! BTC-EVM Bridge - Bitcoin deposit to EVM credit swap service
//!
//! Issues deposit addresses, watches them through an address indexer and
//! credits recipients on the destination chain once deposits confirm.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod config;
mod engine;
mod error;
mod events;
mod issuer;
mod ledger;
mod metrics;
mod oracle;
mod registry;
mod status;
mod swap;

#[cfg(test)]
mod testing;

use config::Settings;
use engine::BridgeEngine;
use issuer::{DepositAddressIssuer, HttpKeyProvider};
use ledger::EvmLedger;
use metrics::MetricsServer;
use oracle::EsploraOracle;
use registry::{InMemorySwapRegistry, PgSwapRegistry, SwapRegistry};
use status::StatusReporter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting BTC-EVM Bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {} ({} confirmations, {}s TTL)",
        settings.bridge.instance_id,
        settings.bridge.confirmation_threshold,
        settings.bridge.swap_ttl_secs
    );

    // Swap registry
    let registry: Arc<dyn SwapRegistry> = match &settings.database {
        Some(database) => {
            let pg = PgSwapRegistry::connect(database).await?;
            pg.ensure_schema().await?;
            info!("Database connection established");
            Arc::new(pg)
        }
        None => Arc::new(InMemorySwapRegistry::new()),
    };

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // External capabilities
    let key_provider = Arc::new(HttpKeyProvider::new(&settings.key_provider)?);
    let issuer = DepositAddressIssuer::new(key_provider, settings.key_provider.network);
    let oracle = Arc::new(EsploraOracle::new(settings.oracle.clone())?);
    let ledger = Arc::new(EvmLedger::new(&settings.ledger).await?);
    info!("Source and destination chain adapters initialized");

    let engine = Arc::new(BridgeEngine::new(
        registry.clone(),
        issuer,
        oracle,
        ledger,
        settings.bridge.clone(),
    ));
    let reporter = Arc::new(StatusReporter::new(registry.clone()));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = api::AppState {
            engine: engine.clone(),
            reporter: reporter.clone(),
            registry: registry.clone(),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start bridge engine
    let engine_handle = tokio::spawn({
        let engine = engine.clone();
        async move {
            if let Err(e) = engine.run().await {
                error!("Bridge engine error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let registry = registry.clone();
        let reporter = reporter.clone();
        let interval = settings.bridge.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                if let Err(e) = registry.health_check().await {
                    warn!("Registry health check failed: {}", e);
                    metrics::record_health_check_failure();
                    continue;
                }

                match reporter.snapshot().await {
                    Ok(snapshot) => metrics::record_status(&snapshot),
                    Err(e) => warn!("Status snapshot failed: {}", e),
                }
            }
        }
    });

    info!("BTC-EVM Bridge is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Let the current tick finish, then give running credits a bounded window;
    // anything still `Finalizing` resumes on restart
    engine.stop();
    if let Err(e) = engine_handle.await {
        warn!("Bridge engine task ended abnormally: {}", e);
    }
    let drain =
        settings.bridge.finalization_timeout() * settings.bridge.finalization_max_retries;
    if tokio::time::timeout(drain, engine.wait_for_finalizations())
        .await
        .is_err()
    {
        warn!("Finalizations still running after {:?}, leaving them to resume", drain);
    }

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("BTC-EVM Bridge stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,btc_evm_bridge=debug,sqlx=warn,hyper=warn")
    });

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
