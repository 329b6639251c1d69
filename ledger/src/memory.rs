//! In-memory ledger store.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use ethsettle_common::WalletAddress;
use rust_decimal::Decimal;
use tracing::debug;

use crate::account::Account;
use crate::journal::JournalEntry;
use crate::store::{AccountLease, LedgerStore, StoreError, StoreResult};

/// Ledger store backed by concurrent maps.
///
/// Used for tests, the simulator, and deployments without a database. Faults
/// can be injected to exercise the coordinator's store-failure paths.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    accounts: DashMap<WalletAddress, Account>,
    journal: DashMap<WalletAddress, Vec<JournalEntry>>,
    save_failures: AtomicU32,
    read_failures: AtomicU32,
}

impl InMemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` saves fail with [`StoreError::Unavailable`].
    pub fn fail_next_saves(&self, count: u32) {
        self.save_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` reads fail with [`StoreError::Unavailable`].
    pub fn fail_next_reads(&self, count: u32) {
        self.read_failures.store(count, Ordering::SeqCst);
    }

    /// Number of accounts held.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Sum of all balances.
    pub fn total_balance(&self) -> Decimal {
        self.accounts.iter().map(|a| a.balance).sum()
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_read(&self) -> StoreResult<()> {
        if Self::take_fault(&self.read_failures) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find_account(&self, address: &WalletAddress) -> StoreResult<Option<Account>> {
        self.check_read()?;
        Ok(self.accounts.get(address).map(|a| a.clone()))
    }

    async fn create_account(&self, address: &WalletAddress) -> StoreResult<Account> {
        self.check_read()?;
        let account = self
            .accounts
            .entry(address.clone())
            .or_insert_with(|| {
                debug!(wallet = %address, "Creating account");
                Account::new(address.clone())
            })
            .clone();
        Ok(account)
    }

    async fn save_account(&self, account: &Account, entry: &JournalEntry) -> StoreResult<Account> {
        if Self::take_fault(&self.save_failures) {
            return Err(StoreError::Unavailable("injected save failure".to_string()));
        }

        if account.balance < Decimal::ZERO {
            return Err(StoreError::Constraint(format!(
                "negative balance {} for {}",
                account.balance, account.wallet_address
            )));
        }

        let mut stored = self
            .accounts
            .get_mut(&account.wallet_address)
            .ok_or_else(|| StoreError::NotFound(account.wallet_address.clone()))?;

        if stored.version != account.version {
            return Err(StoreError::VersionConflict {
                address: account.wallet_address.clone(),
                expected: account.version,
                found: stored.version,
            });
        }

        let saved = Account {
            version: account.version + 1,
            ..account.clone()
        };
        *stored = saved.clone();

        // Appended while the account entry is still held so journal order
        // matches commit order.
        self.journal
            .entry(account.wallet_address.clone())
            .or_default()
            .push(entry.clone());

        Ok(saved)
    }

    async fn history(&self, address: &WalletAddress) -> StoreResult<Vec<JournalEntry>> {
        self.check_read()?;
        Ok(self
            .journal
            .get(address)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }

    async fn lease(&self, _address: &WalletAddress) -> StoreResult<AccountLease> {
        Ok(AccountLease::InProcess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethsettle_common::{EthAmount, OperationId};

    fn address(suffix: &str) -> WalletAddress {
        WalletAddress::parse(&format!("0x{:0>40}", suffix)).unwrap()
    }

    fn credit(account: &Account, amount: &str) -> (Account, JournalEntry) {
        let amount = EthAmount::parse(amount).unwrap();
        let updated = account.credited(&amount).unwrap();
        let entry = JournalEntry::credit(OperationId::new(), &updated, amount.value());
        (updated, entry)
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = InMemoryLedgerStore::new();
        let addr = address("a1");

        let first = store.create_account(&addr).await.unwrap();
        let (updated, entry) = credit(&first, "1.5");
        store.save_account(&updated, &entry).await.unwrap();

        let second = store.create_account(&addr).await.unwrap();
        assert_eq!(second.balance, Decimal::from_str_exact("1.5").unwrap());
        assert_eq!(store.account_count(), 1);
    }

    #[tokio::test]
    async fn test_save_bumps_version_and_journals() {
        let store = InMemoryLedgerStore::new();
        let addr = address("a2");

        let account = store.create_account(&addr).await.unwrap();
        let (updated, entry) = credit(&account, "2");
        let saved = store.save_account(&updated, &entry).await.unwrap();

        assert_eq!(saved.version, 1);
        assert_eq!(store.history(&addr).await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let store = InMemoryLedgerStore::new();
        let addr = address("a3");

        let account = store.create_account(&addr).await.unwrap();
        let (first, first_entry) = credit(&account, "1");
        let (second, second_entry) = credit(&account, "2");

        store.save_account(&first, &first_entry).await.unwrap();
        let err = store.save_account(&second, &second_entry).await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::VersionConflict { expected: 0, found: 1, .. }
        ));
        assert_eq!(store.history(&addr).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed() {
        let store = InMemoryLedgerStore::new();
        let addr = address("a4");
        let account = store.create_account(&addr).await.unwrap();
        let (updated, entry) = credit(&account, "1");

        store.fail_next_saves(1);
        assert!(matches!(
            store.save_account(&updated, &entry).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.save_account(&updated, &entry).await.is_ok());

        store.fail_next_reads(1);
        assert!(store.find_account(&addr).await.is_err());
        assert!(store.find_account(&addr).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_save_unknown_account() {
        let store = InMemoryLedgerStore::new();
        let account = Account::new(address("a5"));
        let (updated, entry) = credit(&account, "1");

        assert!(matches!(
            store.save_account(&updated, &entry).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
