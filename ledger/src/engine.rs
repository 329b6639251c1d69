//! Ledger engine: read-modify-write over a store with bounded retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethsettle_common::time::constants;
use ethsettle_common::{EthAmount, OperationId, Result, SettleError, WalletAddress};
use tracing::{info, instrument, warn};

use crate::account::Account;
use crate::journal::JournalEntry;
use crate::store::{AccountLease, LedgerStore, StoreError};

/// Retry budget for transient store faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for StoreRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: constants::STORE_RETRY_ATTEMPTS,
            backoff: constants::STORE_RETRY_BACKOFF,
        }
    }
}

/// Outcome of a single attempt: either a store fault that may be retried, or
/// a business failure that ends the operation.
enum AttemptError {
    Store(StoreError),
    Settle(SettleError),
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        AttemptError::Store(err)
    }
}

impl From<SettleError> for AttemptError {
    fn from(err: SettleError) -> Self {
        AttemptError::Settle(err)
    }
}

/// The ledger engine applies balance changes to a [`LedgerStore`].
///
/// Every change is an optimistic read-modify-write: the account is read,
/// updated in memory, and saved with a version check together with its
/// journal entry. Version conflicts and unavailable-store faults restart the
/// cycle until the retry budget runs out.
#[derive(Clone)]
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    retry: StoreRetryPolicy,
}

impl LedgerEngine {
    /// Create a new ledger engine with the default retry policy.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_retry_policy(store, StoreRetryPolicy::default())
    }

    /// Create a new ledger engine with an explicit retry policy.
    pub fn with_retry_policy(store: Arc<dyn LedgerStore>, retry: StoreRetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Name of the underlying store.
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Retry policy in use.
    pub fn retry_policy(&self) -> StoreRetryPolicy {
        self.retry
    }

    /// Look up an account.
    pub async fn find_account(&self, address: &WalletAddress) -> Result<Option<Account>> {
        let store = &self.store;
        self.with_retry("find_account", address, || async move {
            Ok(store.find_account(address).await?)
        })
        .await
    }

    /// Return the account for `address`, creating it with a zero balance on
    /// first sighting.
    pub async fn get_or_create(&self, address: &WalletAddress) -> Result<Account> {
        let store = &self.store;
        self.with_retry("get_or_create", address, || async move {
            Ok(store.create_account(address).await?)
        })
        .await
    }

    /// Add `amount` to the account, creating the account if needed.
    #[instrument(skip(self), fields(wallet = %address))]
    pub async fn credit(
        &self,
        address: &WalletAddress,
        amount: &EthAmount,
        operation_id: OperationId,
    ) -> Result<Account> {
        let store = &self.store;
        let saved = self
            .with_retry("credit", address, || async move {
                let account = store.create_account(address).await?;
                let updated = account.credited(amount)?;
                let entry = JournalEntry::credit(operation_id, &updated, amount.value());
                Ok(store.save_account(&updated, &entry).await?)
            })
            .await?;

        info!(
            operation_id = %operation_id,
            amount = %amount,
            balance = %saved.balance,
            "Credited account"
        );
        Ok(saved)
    }

    /// Remove `amount` from an existing account.
    ///
    /// Fails with `AccountNotFound` if the account does not exist and with
    /// `InsufficientBalance` if the persisted balance does not cover `amount`.
    #[instrument(skip(self), fields(wallet = %address))]
    pub async fn debit(
        &self,
        address: &WalletAddress,
        amount: &EthAmount,
        operation_id: OperationId,
        tx_hash: Option<String>,
    ) -> Result<Account> {
        let store = &self.store;
        let saved = self
            .with_retry("debit", address, || {
                let tx_hash = tx_hash.clone();
                async move {
                    let account = store
                        .find_account(address)
                        .await?
                        .ok_or_else(|| SettleError::AccountNotFound(address.clone()))?;
                    let updated = account.debited(amount)?;
                    let entry =
                        JournalEntry::debit(operation_id, &updated, amount.value(), tx_hash);
                    Ok(store.save_account(&updated, &entry).await?)
                }
            })
            .await?;

        info!(
            operation_id = %operation_id,
            amount = %amount,
            balance = %saved.balance,
            tx_hash = tx_hash.as_deref().unwrap_or("-"),
            "Debited account"
        );
        Ok(saved)
    }

    /// Journal entries for an account, oldest first.
    pub async fn history(&self, address: &WalletAddress) -> Result<Vec<JournalEntry>> {
        let store = &self.store;
        self.with_retry("history", address, || async move {
            Ok(store.history(address).await?)
        })
        .await
    }

    /// Take the store-level lease on an account.
    pub async fn lease(&self, address: &WalletAddress) -> Result<AccountLease> {
        let store = &self.store;
        self.with_retry("lease", address, || async move {
            Ok(store.lease(address).await?)
        })
        .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        address: &WalletAddress,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut tries = 0;

        loop {
            tries += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Settle(err)) => return Err(err),
                Err(AttemptError::Store(err)) if err.is_retryable() && tries < max_attempts => {
                    warn!(
                        operation,
                        wallet = %address,
                        attempt = tries,
                        error = %err,
                        "Store fault, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(AttemptError::Store(err)) => {
                    warn!(
                        operation,
                        wallet = %address,
                        attempts = tries,
                        error = %err,
                        "Store fault, giving up"
                    );
                    return Err(escalate(err));
                }
            }
        }
    }
}

fn escalate(err: StoreError) -> SettleError {
    match err {
        StoreError::NotFound(address) => SettleError::AccountNotFound(address),
        other => SettleError::StoreUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal;
    use crate::memory::InMemoryLedgerStore;
    use rust_decimal::Decimal;

    fn address(suffix: &str) -> WalletAddress {
        WalletAddress::parse(&format!("0x{:0>40}", suffix)).unwrap()
    }

    fn eth(s: &str) -> EthAmount {
        EthAmount::parse(s).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn engine() -> (Arc<InMemoryLedgerStore>, LedgerEngine) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let policy = StoreRetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let engine = LedgerEngine::with_retry_policy(store.clone(), policy);
        (store, engine)
    }

    #[tokio::test]
    async fn test_credit_creates_account() {
        let (_, engine) = engine();
        let addr = address("b1");

        let account = engine.credit(&addr, &eth("2.5"), OperationId::new()).await.unwrap();
        assert_eq!(account.balance, dec("2.5"));
        assert_eq!(account.version, 1);
    }

    #[tokio::test]
    async fn test_debit_unknown_account() {
        let (store, engine) = engine();
        let err = engine
            .debit(&address("b2"), &eth("1"), OperationId::new(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, SettleError::AccountNotFound(_)));
        assert_eq!(store.account_count(), 0);
    }

    #[tokio::test]
    async fn test_debit_checks_persisted_balance() {
        let (_, engine) = engine();
        let addr = address("b3");
        engine.credit(&addr, &eth("1"), OperationId::new()).await.unwrap();

        let err = engine
            .debit(&addr, &eth("1.5"), OperationId::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SettleError::InsufficientBalance { .. }));

        let account = engine.find_account(&addr).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_transient_faults_are_retried() {
        let (store, engine) = engine();
        let addr = address("b4");
        engine.credit(&addr, &eth("3"), OperationId::new()).await.unwrap();

        store.fail_next_saves(2);
        let account = engine
            .debit(&addr, &eth("1"), OperationId::new(), Some("0xabc".into()))
            .await
            .unwrap();
        assert_eq!(account.balance, dec("2"));

        let history = engine.history(&addr).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].tx_hash.as_deref(), Some("0xabc"));
        assert!(journal::is_consistent(&history));
    }

    #[tokio::test]
    async fn test_exhausted_retries_escalate() {
        let (store, engine) = engine();
        let addr = address("b5");
        engine.credit(&addr, &eth("1"), OperationId::new()).await.unwrap();

        store.fail_next_saves(3);
        let err = engine
            .credit(&addr, &eth("1"), OperationId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SettleError::StoreUnavailable(_)));

        let account = engine.find_account(&addr).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::ONE);
        assert_eq!(engine.history(&addr).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_credits_do_not_lose_updates() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let policy = StoreRetryPolicy {
            max_attempts: 50,
            backoff: Duration::from_millis(1),
        };
        let engine = LedgerEngine::with_retry_policy(store, policy);
        let addr = address("b6");

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let engine = engine.clone();
                let addr = addr.clone();
                tokio::spawn(async move {
                    engine.credit(&addr, &eth("0.1"), OperationId::new()).await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let account = engine.find_account(&addr).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::ONE);
        assert!(journal::is_consistent(&engine.history(&addr).await.unwrap()));
    }
}
