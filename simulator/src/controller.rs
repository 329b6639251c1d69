//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};

use ethsettle_chain::{ChainError, SimulatedChain, SimulatedOutcome};
use ethsettle_common::{RawAmount, SettleError, WEI_DECIMALS};
use ethsettle_coordinator::{
    CoordinatorConfig, CreateAccountRequest, DepositRequest, SettlementCoordinator,
    WithdrawRequest,
};
use ethsettle_ledger::{Account, InMemoryLedgerStore};

use crate::metrics::{OperationKind, SimulationMetrics};
use crate::scenario::{AssertCondition, FaultType, Scenario, ScenarioStep};
use crate::wallet::{SimulatedWallet, WalletFactory};

/// Controls the simulation.
pub struct SimulationController {
    /// Number of wallets.
    wallet_count: usize,
    /// Simulation speed multiplier.
    speed: f64,
    /// Random number generator.
    rng: Arc<RwLock<StdRng>>,
    /// Simulated wallets.
    wallets: Arc<RwLock<Vec<SimulatedWallet>>>,
    /// Coordinator under test.
    coordinator: Arc<SettlementCoordinator>,
    /// Chain double behind the coordinator.
    chain: Arc<SimulatedChain>,
    /// Ledger store behind the coordinator.
    store: Arc<InMemoryLedgerStore>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
    /// ETH credited by successful deposits.
    deposited: Arc<RwLock<Decimal>>,
    /// Error code of the last operation, or `OK`.
    last_outcome: Arc<RwLock<String>>,
    /// Running flag.
    running: Arc<RwLock<bool>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(wallet_count: usize, speed: f64, seed: Option<u64>, config: CoordinatorConfig) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let store = Arc::new(InMemoryLedgerStore::new());
        let chain = Arc::new(SimulatedChain::new());
        let coordinator = Arc::new(SettlementCoordinator::new(
            config,
            store.clone(),
            chain.clone(),
        ));

        Self {
            wallet_count,
            speed,
            rng: Arc::new(RwLock::new(rng)),
            wallets: Arc::new(RwLock::new(Vec::new())),
            coordinator,
            chain,
            store,
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
            deposited: Arc::new(RwLock::new(Decimal::ZERO)),
            last_outcome: Arc::new(RwLock::new("OK".to_string())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Initialize the simulation.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        info!("Initializing simulation with {} wallets", self.wallet_count);

        self.coordinator.start().await?;

        let wallets = {
            let mut rng = self.rng.write().await;
            WalletFactory::create_wallets(self.wallet_count, &mut *rng)?
        };

        for wallet in &wallets {
            self.coordinator
                .get_or_create_account(CreateAccountRequest::new(wallet.address.as_str()))
                .await?;
            info!("Opened account for {} ({})", wallet.label, wallet.address);
        }

        *self.wallets.write().await = wallets;

        Ok(())
    }

    /// Run a scenario. Fails on the first assertion that does not hold.
    pub async fn run_scenario(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        *self.running.write().await = true;

        for step in &scenario.steps {
            if !*self.running.read().await {
                break;
            }

            self.execute_step(step).await?;
        }

        *self.running.write().await = false;

        info!("Scenario {} passed", scenario.name);
        Ok(())
    }

    /// Run random deposits and withdrawals until the duration ends or Ctrl+C.
    pub async fn run(self: &Arc<Self>, duration: Option<Duration>) -> anyhow::Result<()> {
        info!("Running simulation in continuous mode");

        *self.running.write().await = true;

        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                if !*controller.running.read().await {
                    break;
                }

                controller.random_operation().await;

                // Wait based on speed
                let delay = Duration::from_millis((200.0 / controller.speed) as u64);
                tokio::time::sleep(delay).await;
            }
        });

        // Wait for duration or Ctrl+C
        match duration {
            Some(d) => {
                tokio::time::sleep(d).await;
            }
            None => {
                tokio::signal::ctrl_c().await?;
            }
        }

        *self.running.write().await = false;
        handle.await?;

        self.coordinator.stop().await?;
        self.check_conservation().await
    }

    /// Get simulation metrics.
    pub async fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    async fn random_operation(&self) {
        let (wallet, deposit, cents, upper_case, fault) = {
            let wallets = self.wallets.read().await;
            if wallets.is_empty() {
                return;
            }
            let mut rng = self.rng.write().await;
            let wallet = wallets[rng.gen_range(0..wallets.len())].clone();
            (
                wallet,
                rng.gen_bool(0.45),
                rng.gen_range(1..=250i64),
                rng.gen_bool(0.3),
                rng.gen_range(0..100u32),
            )
        };

        let address = if upper_case {
            wallet.upper_case_address()
        } else {
            wallet.address.to_string()
        };
        let amount = Decimal::new(cents, 2).to_string();

        if deposit {
            info!("Deposit {} ETH to {}", amount, wallet.label);
            let _ = self.deposit(address, &amount).await;
        } else {
            match fault {
                0..=2 => self
                    .chain
                    .fail_next(ChainError::Reverted("simulated revert".to_string())),
                3 => self
                    .chain
                    .fail_next(ChainError::Unavailable("simulated outage".to_string())),
                _ => {}
            }
            info!("Withdraw {} ETH from {}", amount, wallet.label);
            let _ = self.withdraw(address, &amount).await;
        }
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                let adjusted = (*millis as f64 / self.speed) as u64;
                info!("Waiting {}ms (adjusted: {}ms)", millis, adjusted);
                tokio::time::sleep(Duration::from_millis(adjusted)).await;
            }
            ScenarioStep::OpenAccount { wallet } => {
                let wallet = self.wallet(wallet).await?;
                let result = self
                    .coordinator
                    .get_or_create_account(CreateAccountRequest::new(wallet.upper_case_address()))
                    .await;
                self.set_outcome(&result).await;
            }
            ScenarioStep::Deposit { wallet, amount } => {
                let wallet = self.wallet(wallet).await?;
                info!("Deposit {} ETH to {}", amount, wallet.label);
                let result = self.deposit(wallet.address.to_string(), amount).await;
                self.set_outcome(&result).await;
            }
            ScenarioStep::Withdraw { wallet, amount } => {
                let wallet = self.wallet(wallet).await?;
                info!("Withdraw {} ETH from {}", amount, wallet.label);
                let result = self.withdraw(wallet.address.to_string(), amount).await;
                self.set_outcome(&result).await;
            }
            ScenarioStep::ConcurrentWithdrawals {
                wallet,
                amount,
                count,
            } => {
                let wallet = self.wallet(wallet).await?;
                info!("Withdraw {} ETH from {} x{}", amount, wallet.label, count);
                let results = join_all(
                    (0..*count).map(|_| self.withdraw(wallet.address.to_string(), amount)),
                )
                .await;
                let settled = results.iter().filter(|r| r.is_ok()).count();
                info!("{} of {} concurrent withdrawals settled", settled, count);
            }
            ScenarioStep::InjectFault { fault_type } => {
                info!("Injecting fault {:?}", fault_type);
                self.inject_fault(fault_type);
            }
            ScenarioStep::ClearFaults => {
                info!("Clearing faults");
                self.chain.set_latency(Duration::ZERO);
            }
            ScenarioStep::Assert { condition } => {
                info!("Asserting condition: {:?}", condition);
                self.check(condition).await?;
            }
        }

        Ok(())
    }

    fn inject_fault(&self, fault_type: &FaultType) {
        match fault_type {
            FaultType::ChainInsufficientFunds => self.chain.fail_next(ChainError::InsufficientFunds(
                "simulated vault shortfall".to_string(),
            )),
            FaultType::ChainRevert => self
                .chain
                .fail_next(ChainError::Reverted("simulated revert".to_string())),
            FaultType::ChainSlowConfirm { delay_ms } => {
                self.chain.push_outcome(SimulatedOutcome::Delay(
                    Duration::from_millis(*delay_ms),
                    Box::new(SimulatedOutcome::Confirm),
                ))
            }
            FaultType::ChainHang => self.chain.hang_next(),
            FaultType::ChainLatency { delay_ms } => {
                self.chain.set_latency(Duration::from_millis(*delay_ms))
            }
            FaultType::StoreOutage { failed_writes } => self.store.fail_next_saves(*failed_writes),
        }
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::BalanceEquals { wallet, amount } => {
                let wallet = self.wallet(wallet).await?;
                let expected = Decimal::from_str_exact(amount)?;
                let actual = self.coordinator.get_account(wallet.address.as_str()).await?.balance;
                if actual != expected {
                    anyhow::bail!(
                        "balance of {} is {} ETH, expected {} ETH",
                        wallet.label,
                        actual,
                        expected
                    );
                }
            }
            AssertCondition::LastOutcome { code } => {
                let actual = self.last_outcome.read().await.clone();
                if &actual != code {
                    anyhow::bail!("last outcome was {}, expected {}", actual, code);
                }
            }
            AssertCondition::ChainCalls { count } => {
                let actual = self.chain.call_count();
                if actual != *count {
                    anyhow::bail!("chain received {} calls, expected {}", actual, count);
                }
            }
        }

        Ok(())
    }

    async fn deposit(&self, address: String, amount: &str) -> Result<Account, SettleError> {
        let started = Instant::now();
        let result = self
            .coordinator
            .deposit(DepositRequest::new(address, amount))
            .await;
        self.metrics.write().await.record(
            OperationKind::Deposit,
            &result,
            started.elapsed().as_millis() as u64,
        );

        if result.is_ok() {
            if let Ok(credited) = RawAmount::from(amount).parse() {
                *self.deposited.write().await += credited.value();
            }
        }
        result
    }

    async fn withdraw(&self, address: String, amount: &str) -> Result<Account, SettleError> {
        let started = Instant::now();
        let result = self
            .coordinator
            .withdraw(WithdrawRequest::new(address, amount))
            .await;
        self.metrics.write().await.record(
            OperationKind::Withdrawal,
            &result,
            started.elapsed().as_millis() as u64,
        );

        if let Err(e) = &result {
            if e.requires_reconciliation() {
                warn!("Withdrawal needs reconciliation: {}", e);
            }
        }
        result
    }

    async fn set_outcome(&self, result: &Result<Account, SettleError>) {
        let code = match result {
            Ok(_) => "OK",
            Err(e) => e.error_code(),
        };
        *self.last_outcome.write().await = code.to_string();
    }

    async fn wallet(&self, label: &str) -> anyhow::Result<SimulatedWallet> {
        self.wallets
            .read()
            .await
            .iter()
            .find(|w| w.label == label)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Wallet not found: {}", label))
    }

    /// Ledger balances must equal deposits minus what the chain paid out.
    async fn check_conservation(&self) -> anyhow::Result<()> {
        let deposited = *self.deposited.read().await;
        let paid_out = Decimal::from_i128_with_scale(
            i128::try_from(self.chain.total_withdrawn_wei())?,
            WEI_DECIMALS,
        );
        let held = self.store.total_balance();
        let unreconciled = self.metrics.read().await.withdrawals_unreconciled;

        info!(
            "Deposited {} ETH, paid out {} ETH, ledger holds {} ETH",
            deposited, paid_out, held
        );

        if unreconciled == 0 && deposited - paid_out != held {
            anyhow::bail!(
                "ledger holds {} ETH but deposits minus payouts is {} ETH",
                held,
                deposited - paid_out
            );
        }
        if unreconciled > 0 {
            warn!("{} withdrawals need reconciliation, skipping conservation check", unreconciled);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> CoordinatorConfig {
        CoordinatorConfig {
            chain_call_timeout: Duration::from_millis(500),
            late_outcome_grace: Duration::from_secs(5),
            ..CoordinatorConfig::default()
        }
    }

    async fn create_test_controller() -> SimulationController {
        let mut controller = SimulationController::new(5, 100.0, Some(42), create_test_config());
        controller.initialize().await.unwrap();
        controller
    }

    #[tokio::test]
    async fn test_fast_scenarios_pass() {
        for name in ["basic-flow", "concurrent-withdrawals", "chain-failure", "persist-mismatch"] {
            let controller = create_test_controller().await;
            controller
                .run_scenario(Scenario::load(name).unwrap())
                .await
                .unwrap_or_else(|e| panic!("{name}: {e}"));
        }
    }

    #[tokio::test]
    async fn test_failed_assertion_is_reported() {
        let controller = create_test_controller().await;
        let scenario = Scenario {
            name: "wrong-balance".to_string(),
            description: "expects money that was never deposited".to_string(),
            steps: vec![ScenarioStep::Assert {
                condition: AssertCondition::BalanceEquals {
                    wallet: "alice".to_string(),
                    amount: "1".to_string(),
                },
            }],
        };

        assert!(controller.run_scenario(scenario).await.is_err());
    }

    #[tokio::test]
    async fn test_continuous_run_conserves_funds() {
        let controller = Arc::new(create_test_controller().await);

        controller
            .run(Some(Duration::from_millis(300)))
            .await
            .unwrap();

        let metrics = controller.get_metrics().await;
        assert!(metrics.total_operations > 0);
    }
}
