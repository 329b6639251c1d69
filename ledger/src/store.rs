//! Ledger store trait and backend errors.

use async_trait::async_trait;
use ethsettle_common::WalletAddress;
use thiserror::Error;

use crate::account::Account;
use crate::journal::JournalEntry;
use crate::postgres::AdvisoryLease;

/// Errors reported by a ledger store backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// I/O or connection failure. May succeed on retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The stored version moved since the account was read.
    #[error("Version conflict for {address}: expected {expected}, found {found}")]
    VersionConflict {
        address: WalletAddress,
        expected: u64,
        found: u64,
    },

    /// Save targeted an account that does not exist.
    #[error("Account not found in store: {0}")]
    NotFound(WalletAddress),

    /// The backend refused the write (e.g. a negative balance).
    #[error("Store constraint violated: {0}")]
    Constraint(String),
}

impl StoreError {
    /// Check if a fresh attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::VersionConflict { .. }
        )
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Exclusive hold on one account, shared across coordinator processes.
///
/// In-process stores return [`AccountLease::InProcess`] because the
/// coordinator's own lock already serializes the account.
#[derive(Debug)]
pub enum AccountLease {
    /// No backend-side lock is needed.
    InProcess,
    /// PostgreSQL advisory lock held on a dedicated connection.
    Advisory(AdvisoryLease),
}

impl AccountLease {
    /// Release the lease.
    pub async fn release(self) -> StoreResult<()> {
        match self {
            AccountLease::InProcess => Ok(()),
            AccountLease::Advisory(lease) => lease.release().await,
        }
    }
}

/// Durable storage of accounts keyed by normalized wallet address.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Look up an account.
    async fn find_account(&self, address: &WalletAddress) -> StoreResult<Option<Account>>;

    /// Create a zero-balance account, or return the existing one.
    async fn create_account(&self, address: &WalletAddress) -> StoreResult<Account>;

    /// Persist an updated account together with its journal entry.
    ///
    /// Succeeds only if the stored version still equals `account.version`;
    /// the returned account carries the bumped version.
    async fn save_account(&self, account: &Account, entry: &JournalEntry) -> StoreResult<Account>;

    /// Journal entries for an account, oldest first.
    async fn history(&self, address: &WalletAddress) -> StoreResult<Vec<JournalEntry>>;

    /// Take an exclusive lease on an account.
    async fn lease(&self, address: &WalletAddress) -> StoreResult<AccountLease>;
}
