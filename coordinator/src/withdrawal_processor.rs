//! Withdrawal processing: orders the irreversible chain call against the
//! ledger debit.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, instrument, warn};

use ethsettle_chain::{ChainError, ChainReceipt, ChainSettlementService};
use ethsettle_common::{EthAmount, OperationId, Result, SettleError, WalletAddress};
use ethsettle_ledger::{Account, LedgerEngine};

use crate::config::CoordinatorConfig;
use crate::lock_manager::{AccountLockManager, HeldAccount};
use crate::metrics::SharedMetrics;
use crate::withdrawal::{Withdrawal, WithdrawalPhase};

type ChainOutcome = std::result::Result<ChainReceipt, ChainError>;

/// Withdrawal processor handles the withdrawal lifecycle.
///
/// For each attempt it holds the account, re-checks the persisted balance,
/// calls the chain, and debits the ledger only after the chain confirms.
pub struct WithdrawalProcessor {
    ledger: LedgerEngine,
    chain: Arc<dyn ChainSettlementService>,
    locks: Arc<AccountLockManager>,
    metrics: SharedMetrics,
    chain_call_timeout: Duration,
    late_outcome_grace: Duration,
}

impl WithdrawalProcessor {
    /// Create a new withdrawal processor.
    pub fn new(
        ledger: LedgerEngine,
        chain: Arc<dyn ChainSettlementService>,
        locks: Arc<AccountLockManager>,
        metrics: SharedMetrics,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            ledger,
            chain,
            locks,
            metrics,
            chain_call_timeout: config.chain_call_timeout,
            late_outcome_grace: config.late_outcome_grace,
        }
    }

    /// Process a validated withdrawal request through its lifecycle.
    #[instrument(skip_all, fields(wallet = %wallet, amount = %amount))]
    pub async fn process(self: &Arc<Self>, wallet: WalletAddress, amount: EthAmount) -> Result<Account> {
        let amount_wei = amount.to_wei()?;
        let operation_id = OperationId::new();

        self.metrics.withdrawal_initiated();
        let active = ActiveWithdrawal::start(&self.metrics);

        let held = match self.locks.hold(&wallet, &self.ledger).await {
            Ok(held) => held,
            Err(e) => {
                self.record(&Err(e.clone()));
                warn!(operation_id = %operation_id, error = %e, "Could not hold account");
                return Err(e);
            }
        };

        if let Err(e) = self.revalidate(&wallet, &amount).await {
            held.release().await;
            self.record(&Err(e.clone()));
            warn!(operation_id = %operation_id, error = %e, "Withdrawal rejected");
            return Err(e);
        }

        let mut withdrawal = Withdrawal::new(operation_id, wallet, amount, amount_wei);
        advance(&mut withdrawal, WithdrawalPhase::ChainCallInFlight);
        info!(
            operation_id = %operation_id,
            amount_wei = %amount_wei,
            chain = self.chain.name(),
            "Issuing chain withdrawal"
        );

        // The call runs on its own task so a timeout never cancels it.
        let chain = self.chain.clone();
        let recipient = withdrawal.wallet.clone();
        let mut call = tokio::spawn(async move { chain.withdraw(&recipient, amount_wei).await });

        match tokio::time::timeout(self.chain_call_timeout, &mut call).await {
            Ok(joined) => {
                let result = self.settle(&mut withdrawal, join_outcome(joined)).await;
                held.release().await;
                self.record(&result);
                result
            }
            Err(_) => {
                advance(&mut withdrawal, WithdrawalPhase::ChainUnknown);
                error!(
                    operation_id = %operation_id,
                    timeout_ms = self.chain_call_timeout.as_millis() as u64,
                    "Chain call timed out, outcome unknown"
                );
                let err = unknown_error(&withdrawal);
                self.record(&Err(err.clone()));
                self.spawn_late_outcome(withdrawal, call, held, active);
                Err(err)
            }
        }
    }

    /// Re-check the balance against the persisted account.
    async fn revalidate(&self, wallet: &WalletAddress, amount: &EthAmount) -> Result<Account> {
        let account = self
            .ledger
            .find_account(wallet)
            .await?
            .ok_or_else(|| SettleError::AccountNotFound(wallet.clone()))?;

        if !account.has_sufficient_funds(amount) {
            return Err(SettleError::InsufficientBalance {
                required: amount.value(),
                available: account.balance,
            });
        }

        Ok(account)
    }

    /// Apply a chain outcome to the ledger.
    async fn settle(&self, withdrawal: &mut Withdrawal, outcome: ChainOutcome) -> Result<Account> {
        let receipt = match outcome {
            Ok(receipt) => receipt,
            Err(err) => return Err(chain_failure(withdrawal, err)),
        };

        advance(withdrawal, WithdrawalPhase::ChainConfirmed);
        withdrawal.tx_hash = Some(receipt.tx_hash.clone());
        info!(
            operation_id = %withdrawal.operation_id,
            tx_hash = %receipt.tx_hash,
            block_number = ?receipt.block_number,
            "Chain withdrawal confirmed"
        );

        let debited = self
            .ledger
            .debit(
                &withdrawal.wallet,
                &withdrawal.amount,
                withdrawal.operation_id,
                Some(receipt.tx_hash.clone()),
            )
            .await;

        match debited {
            Ok(account) => {
                advance(withdrawal, WithdrawalPhase::LedgerUpdated);
                info!(
                    operation_id = %withdrawal.operation_id,
                    tx_hash = %receipt.tx_hash,
                    balance = %account.balance,
                    "Withdrawal settled"
                );
                Ok(account)
            }
            Err(cause) => {
                advance(withdrawal, WithdrawalPhase::Inconsistent);
                error!(
                    operation_id = %withdrawal.operation_id,
                    tx_hash = %receipt.tx_hash,
                    error = %cause,
                    "Chain withdrawal confirmed but ledger not updated, reconciliation required"
                );
                Err(SettleError::SettlementPersistMismatch {
                    wallet: withdrawal.wallet.clone(),
                    amount: withdrawal.amount.value(),
                    tx_hash: receipt.tx_hash,
                    operation_id: withdrawal.operation_id,
                    cause: cause.to_string(),
                })
            }
        }
    }

    /// Keep the account held until the timed-out call resolves or the grace
    /// period ends.
    fn spawn_late_outcome(
        self: &Arc<Self>,
        mut withdrawal: Withdrawal,
        call: JoinHandle<ChainOutcome>,
        held: HeldAccount,
        active: ActiveWithdrawal,
    ) {
        let processor = Arc::clone(self);

        tokio::spawn(async move {
            match tokio::time::timeout(processor.late_outcome_grace, call).await {
                Ok(joined) => {
                    processor.metrics.late_outcome_resolved();
                    match join_outcome(joined) {
                        Err(err) if err.failure_kind().is_none() => {
                            error!(
                                operation_id = %withdrawal.operation_id,
                                error = %err,
                                "Late chain outcome still indeterminate, reconciliation required"
                            );
                        }
                        outcome => match processor.settle(&mut withdrawal, outcome).await {
                            Ok(account) => info!(
                                operation_id = %withdrawal.operation_id,
                                balance = %account.balance,
                                "Late chain confirmation applied"
                            ),
                            Err(e) => warn!(
                                operation_id = %withdrawal.operation_id,
                                phase = %withdrawal.phase,
                                error = %e,
                                "Late chain outcome resolved without a debit"
                            ),
                        },
                    }
                }
                Err(_) => {
                    processor.metrics.late_outcome_unresolved();
                    error!(
                        operation_id = %withdrawal.operation_id,
                        wallet = %withdrawal.wallet,
                        amount = %withdrawal.amount,
                        "Chain call unresolved after grace period, releasing account, reconciliation required"
                    );
                }
            }

            held.release().await;
            drop(active);
        });
    }

    fn record(&self, result: &Result<Account>) {
        match result {
            Ok(_) => self.metrics.withdrawal_success(),
            Err(SettleError::ChainCallFailed { .. }) => self.metrics.withdrawal_chain_failed(),
            Err(SettleError::ChainCallUnknown { .. }) => self.metrics.withdrawal_chain_unknown(),
            Err(SettleError::SettlementPersistMismatch { .. }) => {
                self.metrics.withdrawal_inconsistent()
            }
            Err(_) => self.metrics.withdrawal_rejected(),
        }
    }
}

/// Counts a withdrawal as active until dropped.
struct ActiveWithdrawal(SharedMetrics);

impl ActiveWithdrawal {
    fn start(metrics: &SharedMetrics) -> Self {
        metrics.withdrawal_started();
        Self(metrics.clone())
    }
}

impl Drop for ActiveWithdrawal {
    fn drop(&mut self) {
        self.0.withdrawal_finished();
    }
}

fn advance(withdrawal: &mut Withdrawal, next: WithdrawalPhase) {
    match withdrawal.transition_to(next) {
        Ok(()) => debug!(
            operation_id = %withdrawal.operation_id,
            phase = %next,
            "Withdrawal phase changed"
        ),
        Err(e) => error!(operation_id = %withdrawal.operation_id, error = %e, "Withdrawal phase not changed"),
    }
}

fn chain_failure(withdrawal: &mut Withdrawal, err: ChainError) -> SettleError {
    match err.failure_kind() {
        Some(kind) => {
            advance(withdrawal, WithdrawalPhase::ChainFailed);
            warn!(
                operation_id = %withdrawal.operation_id,
                kind = %kind,
                error = %err,
                "Chain withdrawal failed, ledger unchanged"
            );
            SettleError::ChainCallFailed {
                kind,
                message: err.message().to_string(),
            }
        }
        None => {
            advance(withdrawal, WithdrawalPhase::ChainUnknown);
            error!(
                operation_id = %withdrawal.operation_id,
                error = %err,
                "Chain withdrawal outcome unknown"
            );
            unknown_error(withdrawal)
        }
    }
}

fn unknown_error(withdrawal: &Withdrawal) -> SettleError {
    SettleError::ChainCallUnknown {
        wallet: withdrawal.wallet.clone(),
        amount: withdrawal.amount.value(),
        operation_id: withdrawal.operation_id,
    }
}

fn join_outcome(joined: std::result::Result<ChainOutcome, JoinError>) -> ChainOutcome {
    joined.unwrap_or_else(|e| Err(ChainError::Indeterminate(format!("chain call task failed: {e}"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::metrics::Metrics;
    use ethsettle_chain::{SimulatedChain, SimulatedOutcome};
    use ethsettle_common::ChainFailureKind;
    use ethsettle_ledger::{InMemoryLedgerStore, StoreRetryPolicy};
    use rust_decimal::Decimal;

    struct Fixture {
        processor: Arc<WithdrawalProcessor>,
        ledger: LedgerEngine,
        chain: Arc<SimulatedChain>,
        locks: Arc<AccountLockManager>,
        metrics: SharedMetrics,
    }

    fn fixture(chain_call_timeout: Duration, late_outcome_grace: Duration) -> Fixture {
        let store = Arc::new(InMemoryLedgerStore::new());
        let ledger = LedgerEngine::with_retry_policy(
            store,
            StoreRetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
        );
        let chain = Arc::new(SimulatedChain::new());
        let locks = Arc::new(AccountLockManager::new(LockConfig::default()));
        let metrics = Arc::new(Metrics::new());
        let config = CoordinatorConfig {
            chain_call_timeout,
            late_outcome_grace,
            ..CoordinatorConfig::default()
        };

        let processor = Arc::new(WithdrawalProcessor::new(
            ledger.clone(),
            chain.clone(),
            locks.clone(),
            metrics.clone(),
            &config,
        ));

        Fixture {
            processor,
            ledger,
            chain,
            locks,
            metrics,
        }
    }

    fn wallet() -> WalletAddress {
        WalletAddress::parse("0x00000000000000000000000000000000000000f1").unwrap()
    }

    fn eth(s: &str) -> EthAmount {
        EthAmount::parse(s).unwrap()
    }

    async fn funded(fixture: &Fixture, amount: &str) {
        fixture
            .ledger
            .credit(&wallet(), &eth(amount), OperationId::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_chain_receives_wei() {
        let f = fixture(Duration::from_secs(5), Duration::from_secs(5));
        funded(&f, "1").await;

        let account = f.processor.process(wallet(), eth("0.25")).await.unwrap();

        assert_eq!(account.balance, Decimal::from_str_exact("0.75").unwrap());
        let paid = f.chain.confirmed_withdrawals();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].amount_wei, 250_000_000_000_000_000);
        assert_eq!(f.metrics.snapshot().withdrawals_success, 1);
        assert_eq!(f.metrics.snapshot().withdrawals_active, 0);
    }

    #[tokio::test]
    async fn test_indeterminate_chain_error_is_unknown() {
        let f = fixture(Duration::from_secs(5), Duration::from_secs(5));
        funded(&f, "1").await;
        f.chain
            .fail_next(ChainError::Indeterminate("connection reset".into()));

        let err = f.processor.process(wallet(), eth("1")).await.unwrap_err();

        assert!(matches!(err, SettleError::ChainCallUnknown { .. }));
        assert!(err.requires_reconciliation());
        assert_eq!(f.metrics.snapshot().withdrawals_chain_unknown, 1);
        assert!(!f.locks.is_locked(&wallet()));
    }

    #[tokio::test]
    async fn test_chain_failure_kind_is_kept() {
        let f = fixture(Duration::from_secs(5), Duration::from_secs(5));
        funded(&f, "1").await;
        f.chain.fail_next(ChainError::Reverted("0xdead".into()));

        let err = f.processor.process(wallet(), eth("1")).await.unwrap_err();

        assert_eq!(
            err,
            SettleError::ChainCallFailed {
                kind: ChainFailureKind::Reverted,
                message: "0xdead".to_string(),
            }
        );
        let account = f.ledger.find_account(&wallet()).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_late_failure_leaves_ledger_unchanged() {
        let f = fixture(Duration::from_millis(30), Duration::from_secs(5));
        funded(&f, "1").await;
        f.chain.push_outcome(SimulatedOutcome::Delay(
            Duration::from_millis(100),
            Box::new(SimulatedOutcome::Fail(ChainError::InsufficientFunds(
                "vault".into(),
            ))),
        ));

        let err = f.processor.process(wallet(), eth("1")).await.unwrap_err();
        assert!(matches!(err, SettleError::ChainCallUnknown { .. }));
        assert!(f.locks.is_locked(&wallet()));

        for _ in 0..40 {
            if f.metrics.snapshot().late_outcomes_resolved == 1 && !f.locks.is_locked(&wallet()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        assert_eq!(f.metrics.snapshot().late_outcomes_resolved, 1);
        assert!(!f.locks.is_locked(&wallet()));
        let account = f.ledger.find_account(&wallet()).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::ONE);
        assert_eq!(f.ledger.history(&wallet()).await.unwrap().len(), 1);
    }
}
