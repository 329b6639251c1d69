//! EthSettle Coordinator Binary
//!
//! Runs the settlement coordinator against PostgreSQL (or the in-memory store)
//! and the settlement vault contract.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ethsettle_chain::{ChainConfig, VaultContractClient};
use ethsettle_coordinator::{CoordinatorConfig, SettlementCoordinator};
use ethsettle_ledger::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting EthSettle Coordinator");

    // Load configuration
    let config = CoordinatorConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid coordinator configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let chain_config = ChainConfig::from_env();
    if let Err(e) = chain_config.validate() {
        error!(error = %e, "Invalid chain configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store: Arc<dyn LedgerStore> = match &config.database_url {
        Some(url) => Arc::new(PgLedgerStore::connect(url, config.database_max_connections).await?),
        None => {
            warn!("DATABASE_URL not set, balances will not survive a restart");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    let chain = VaultContractClient::new(chain_config)?;
    match chain.connect().await {
        Ok(chain_id) => info!(chain_id, "Connected to chain"),
        Err(e) => warn!(error = %e, "Chain not reachable yet, withdrawals will fail until it is"),
    }

    let coordinator = SettlementCoordinator::new(config.clone(), store, Arc::new(chain));
    coordinator.start().await?;

    info!("Coordinator running");

    let mut metrics_tick = tokio::time::interval(config.metrics_log_interval);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
                break;
            }
            _ = metrics_tick.tick() => {
                let snapshot = coordinator.metrics().snapshot();
                info!(
                    deposits = snapshot.deposits_total,
                    withdrawals = snapshot.withdrawals_total,
                    withdrawals_success = snapshot.withdrawals_success,
                    withdrawals_chain_unknown = snapshot.withdrawals_chain_unknown,
                    withdrawals_inconsistent = snapshot.withdrawals_inconsistent,
                    withdrawals_active = snapshot.withdrawals_active,
                    "Metrics"
                );
            }
        }
    }

    if let Err(e) = coordinator.stop().await {
        error!(error = %e, "Error during shutdown");
    }

    info!("Coordinator shutdown complete");
    Ok(())
}
