//! EthSettle Simulator
//!
//! Drives the coordinator against an in-memory ledger and a simulated chain,
//! either through named fault scenarios or with random load.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;
mod wallet;

use controller::SimulationController;
use ethsettle_coordinator::CoordinatorConfig;
use scenario::Scenario;

/// EthSettle Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "EthSettle load and fault-injection simulator")]
struct Args {
    /// Number of simulated wallets to create
    #[arg(short, long, default_value = "5")]
    wallets: usize,

    /// Scenario to run (basic-flow, concurrent-withdrawals, chain-failure,
    /// chain-timeout, chain-hang, persist-mismatch)
    #[arg(short, long)]
    scenario: Option<String>,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Chain call timeout in milliseconds
    #[arg(long, default_value = "1000")]
    chain_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting EthSettle Simulator");
    info!("Wallets: {}", args.wallets);
    info!("Speed: {}x", args.speed);

    let config = CoordinatorConfig {
        chain_call_timeout: Duration::from_millis(args.chain_timeout_ms),
        late_outcome_grace: Duration::from_secs(10),
        ..CoordinatorConfig::default()
    };
    if let Err(e) = config.validate() {
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    // Create simulation controller
    let mut controller = SimulationController::new(args.wallets, args.speed, args.seed, config);
    controller.initialize().await?;
    let controller = Arc::new(controller);

    info!("Simulator initialized with {} wallets", args.wallets);

    if let Some(scenario_name) = &args.scenario {
        info!("Running scenario: {}", scenario_name);

        let scenario = Scenario::load(scenario_name)?;
        controller.run_scenario(scenario).await?;
    } else {
        info!("Running in continuous mode");
        info!("Press Ctrl+C to stop");

        let duration = if args.duration > 0 {
            Some(Duration::from_secs(args.duration))
        } else {
            None
        };

        controller.run(duration).await?;
    }

    // Print metrics
    let metrics = controller.get_metrics().await;
    info!("Simulation complete");
    info!("Total operations: {}", metrics.total_operations);
    info!("Deposits: {}", metrics.deposits);
    info!("Withdrawals settled: {}", metrics.withdrawals_settled);
    info!("Withdrawals rejected: {}", metrics.withdrawals_rejected);
    info!("Withdrawals failed on chain: {}", metrics.withdrawals_chain_failed);
    info!("Withdrawals needing reconciliation: {}", metrics.withdrawals_unreconciled);
    info!("Other failures: {}", metrics.other_failures);
    info!("Average latency: {}ms", metrics.average_latency_ms());
    info!("p99 latency: {}ms", metrics.p99_latency_ms());

    Ok(())
}
