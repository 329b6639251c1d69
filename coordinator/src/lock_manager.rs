//! Per-account critical sections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use ethsettle_common::{Result, WalletAddress};
use ethsettle_ledger::{AccountLease, LedgerEngine};

use crate::config::LockConfig;

/// Manager for per-account locks.
///
/// Serializes operations on one wallet inside this process. Entries are
/// created on first use and pruned once no task holds or waits on them.
pub struct AccountLockManager {
    /// Lock per normalized wallet address.
    locks: DashMap<WalletAddress, Arc<Mutex<()>>>,
    /// Total acquisitions.
    acquired: AtomicU64,
    /// Configuration.
    config: LockConfig,
}

impl AccountLockManager {
    /// Create a new lock manager.
    pub fn new(config: LockConfig) -> Self {
        Self {
            locks: DashMap::new(),
            acquired: AtomicU64::new(0),
            config,
        }
    }

    /// Wait for exclusive access to an account.
    pub async fn acquire(&self, wallet: &WalletAddress) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(wallet.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;
        self.acquired.fetch_add(1, Ordering::Relaxed);
        guard
    }

    /// Take the in-process lock, then the store lease.
    pub async fn hold(&self, wallet: &WalletAddress, ledger: &LedgerEngine) -> Result<HeldAccount> {
        let guard = self.acquire(wallet).await;
        let lease = ledger.lease(wallet).await?;

        Ok(HeldAccount {
            wallet: wallet.clone(),
            guard,
            lease,
        })
    }

    /// Check if an account is currently held.
    pub fn is_locked(&self, wallet: &WalletAddress) -> bool {
        self.locks
            .get(wallet)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of accounts with a lock entry.
    pub fn tracked_accounts(&self) -> usize {
        self.locks.len()
    }

    /// Total acquisitions since start.
    pub fn acquired_count(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Run cleanup loop to prune idle locks.
    pub async fn run_cleanup_loop(&self) {
        loop {
            tokio::time::sleep(self.config.cleanup_interval).await;
            self.cleanup_idle_locks();
        }
    }

    /// Drop entries nobody holds or waits on.
    fn cleanup_idle_locks(&self) -> usize {
        let before = self.locks.len();
        // The map holds one reference; holders and waiters hold another.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let pruned = before.saturating_sub(self.locks.len());

        if pruned > 0 {
            debug!(pruned, remaining = self.locks.len(), "Pruned idle account locks");
        }
        pruned
    }
}

/// Exclusive hold on an account: the in-process lock plus the store lease.
#[derive(Debug)]
pub struct HeldAccount {
    wallet: WalletAddress,
    guard: OwnedMutexGuard<()>,
    lease: AccountLease,
}

impl HeldAccount {
    /// Wallet held.
    pub fn wallet(&self) -> &WalletAddress {
        &self.wallet
    }

    /// Release the store lease, then the in-process lock.
    pub async fn release(self) {
        let HeldAccount {
            wallet,
            guard,
            lease,
        } = self;

        if let Err(e) = lease.release().await {
            warn!(wallet = %wallet, error = %e, "Failed to release account lease");
        }
        drop(guard);
    }
}
