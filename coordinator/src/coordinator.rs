//! Core coordinator implementation.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{info, instrument, warn, Instrument};

use ethsettle_chain::ChainSettlementService;
use ethsettle_common::{OperationId, Result, SettleError, WalletAddress};
use ethsettle_ledger::{Account, JournalEntry, LedgerEngine, LedgerStore};

use crate::config::CoordinatorConfig;
use crate::lock_manager::AccountLockManager;
use crate::metrics::{Metrics, SharedMetrics};
use crate::request::{CreateAccountRequest, DepositRequest, WithdrawRequest};
use crate::state::CoordinatorState;
use crate::withdrawal_processor::WithdrawalProcessor;

/// The coordinator that owns account balances and settles withdrawals on chain.
pub struct SettlementCoordinator {
    /// Configuration.
    config: CoordinatorConfig,
    /// Current coordinator state.
    state: Arc<RwLock<CoordinatorState>>,
    /// Ledger over the configured store.
    ledger: LedgerEngine,
    /// Per-account locks.
    lock_manager: Arc<AccountLockManager>,
    /// Withdrawal lifecycle.
    withdrawal_processor: Arc<WithdrawalProcessor>,
    /// Counters.
    metrics: SharedMetrics,
    /// Lock cleanup task, while running.
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl SettlementCoordinator {
    /// Create a new coordinator over a ledger store and a chain service.
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainSettlementService>,
    ) -> Self {
        let ledger = LedgerEngine::with_retry_policy(store, config.store_retry);
        let lock_manager = Arc::new(AccountLockManager::new(config.lock_config.clone()));
        let metrics = Arc::new(Metrics::new());
        let withdrawal_processor = Arc::new(WithdrawalProcessor::new(
            ledger.clone(),
            chain,
            lock_manager.clone(),
            metrics.clone(),
            &config,
        ));

        Self {
            config,
            state: Arc::new(RwLock::new(CoordinatorState::Starting)),
            ledger,
            lock_manager,
            withdrawal_processor,
            metrics,
            cleanup_task: Mutex::new(None),
        }
    }

    /// Start the coordinator.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        info!(store = self.ledger.store_name(), "Starting coordinator");

        *self.state.write() = CoordinatorState::Running;

        let lock_manager = self.lock_manager.clone();
        let task = tokio::spawn(async move {
            lock_manager.run_cleanup_loop().await;
        });
        if let Some(previous) = self.cleanup_task.lock().replace(task) {
            previous.abort();
        }

        info!("Coordinator started");
        Ok(())
    }

    /// Stop accepting mutations and wait for in-flight withdrawals.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping coordinator");

        *self.state.write() = CoordinatorState::ShuttingDown;

        self.drain_active_withdrawals().await;

        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }

        *self.state.write() = CoordinatorState::Stopped;

        info!("Coordinator stopped");
        Ok(())
    }

    /// Return the account for a wallet, creating it with a zero balance.
    ///
    /// Idempotent: an existing account is returned unchanged.
    #[instrument(skip(self, request), fields(wallet = %request.wallet_address))]
    pub async fn get_or_create_account(&self, request: CreateAccountRequest) -> Result<Account> {
        self.ensure_accepting()?;
        let wallet = request.validate()?;
        self.ledger.get_or_create(&wallet).await
    }

    /// Read an account without creating it.
    pub async fn get_account(&self, wallet_address: &str) -> Result<Account> {
        let wallet = WalletAddress::parse(wallet_address)?;
        self.ledger
            .find_account(&wallet)
            .await?
            .ok_or(SettleError::AccountNotFound(wallet))
    }

    /// Journal entries for a wallet, oldest first.
    pub async fn history(&self, wallet_address: &str) -> Result<Vec<JournalEntry>> {
        let wallet = WalletAddress::parse(wallet_address)?;
        self.ledger.history(&wallet).await
    }

    /// Credit a wallet's balance, creating the account if needed.
    #[instrument(skip(self, request), fields(wallet = %request.wallet_address))]
    pub async fn deposit(&self, request: DepositRequest) -> Result<Account> {
        self.ensure_accepting()?;
        let (wallet, amount) = request.validate()?;
        let operation_id = OperationId::new();

        let held = match self.lock_manager.hold(&wallet, &self.ledger).await {
            Ok(held) => held,
            Err(e) => {
                self.metrics.deposit_failed();
                warn!(operation_id = %operation_id, error = %e, "Deposit failed");
                return Err(e);
            }
        };
        let result = self.ledger.credit(&wallet, &amount, operation_id).await;
        held.release().await;

        match &result {
            Ok(account) => {
                self.metrics.deposit_applied();
                info!(
                    operation_id = %operation_id,
                    amount = %amount,
                    balance = %account.balance,
                    "Deposit applied"
                );
            }
            Err(e) => {
                self.metrics.deposit_failed();
                warn!(operation_id = %operation_id, error = %e, "Deposit failed");
            }
        }

        result
    }

    /// Pay out from a wallet's balance on chain, then debit the ledger.
    #[instrument(skip(self, request), fields(wallet = %request.wallet_address))]
    pub async fn withdraw(&self, request: WithdrawRequest) -> Result<Account> {
        self.ensure_accepting()?;
        let (wallet, amount) = request.validate()?;

        // Detached so a dropped caller never abandons an in-flight payout.
        let processor = self.withdrawal_processor.clone();
        let task = tokio::spawn(
            async move { processor.process(wallet, amount).await }.in_current_span(),
        );

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(SettleError::ShuttingDown),
        }
    }

    /// Check if the coordinator is accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state.read().accepts_requests()
    }

    /// Get the current coordinator state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Shared counters.
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Withdrawals currently holding or waiting on an account.
    pub fn active_withdrawal_count(&self) -> u64 {
        self.metrics.snapshot().withdrawals_active
    }

    fn ensure_accepting(&self) -> Result<()> {
        if !self.is_accepting_requests() {
            return Err(SettleError::ShuttingDown);
        }
        Ok(())
    }

    async fn drain_active_withdrawals(&self) {
        let drained = timeout(self.config.drain_timeout, async {
            loop {
                let active = self.active_withdrawal_count();
                if active == 0 {
                    break;
                }
                info!(active, "Waiting for active withdrawals to complete");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                active = self.active_withdrawal_count(),
                "Drain timeout elapsed with withdrawals still active"
            );
        }
    }
}
