//! PostgreSQL ledger store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethsettle_common::{OperationId, WalletAddress};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::account::Account;
use crate::journal::{EntryType, JournalEntry};
use crate::store::{AccountLease, LedgerStore, StoreError, StoreResult};

const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_accounts (
    wallet_address TEXT PRIMARY KEY,
    balance NUMERIC(40, 18) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    version BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)"#;

const CREATE_JOURNAL: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_journal (
    id UUID PRIMARY KEY,
    seq BIGSERIAL NOT NULL,
    operation_id UUID NOT NULL,
    wallet_address TEXT NOT NULL REFERENCES ledger_accounts (wallet_address),
    entry_type TEXT NOT NULL,
    amount NUMERIC(40, 18) NOT NULL CHECK (amount > 0),
    balance_after NUMERIC(40, 18) NOT NULL,
    tx_hash TEXT,
    created_at TIMESTAMPTZ NOT NULL
)"#;

const CREATE_JOURNAL_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS ledger_journal_wallet_idx
    ON ledger_journal (wallet_address, seq)"#;

const SELECT_ACCOUNT: &str = r#"
SELECT wallet_address, balance, version, created_at, updated_at
FROM ledger_accounts
WHERE wallet_address = $1"#;

const INSERT_ACCOUNT: &str = r#"
INSERT INTO ledger_accounts (wallet_address, balance, version, created_at, updated_at)
VALUES ($1, 0, 0, $2, $2)
ON CONFLICT (wallet_address) DO NOTHING"#;

const UPDATE_ACCOUNT: &str = r#"
UPDATE ledger_accounts
SET balance = $2, version = version + 1, updated_at = $3
WHERE wallet_address = $1 AND version = $4
RETURNING wallet_address, balance, version, created_at, updated_at"#;

const INSERT_ENTRY: &str = r#"
INSERT INTO ledger_journal
    (id, operation_id, wallet_address, entry_type, amount, balance_after, tx_hash, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#;

const SELECT_HISTORY: &str = r#"
SELECT id, operation_id, wallet_address, entry_type, amount, balance_after, tx_hash, created_at
FROM ledger_journal
WHERE wallet_address = $1
ORDER BY seq"#;

const SELECT_VERSION: &str = "SELECT version FROM ledger_accounts WHERE wallet_address = $1";

const ADVISORY_LOCK: &str = "SELECT pg_advisory_lock(hashtextextended($1, 0))";
const ADVISORY_UNLOCK: &str = "SELECT pg_advisory_unlock(hashtextextended($1, 0))";

/// Postgres error code for a violated CHECK constraint.
const CHECK_VIOLATION: &str = "23514";

/// Ledger store backed by PostgreSQL.
///
/// Each account lease pins a pooled connection for as long as the account is
/// held. Leases are capped below the pool size so the reads and writes made
/// under a lease always find a free connection.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lease_slots: Arc<Semaphore>,
}

impl PgLedgerStore {
    /// Connect to the database and make sure the schema exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx)?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        let slots = lease_slots_for(pool.options().get_max_connections());
        Self {
            pool,
            lease_slots: Arc::new(Semaphore::new(slots)),
        }
    }

    /// Leases that can be taken right now without waiting.
    pub fn available_lease_slots(&self) -> usize {
        self.lease_slots.available_permits()
    }

    /// Create tables if they are missing.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in [CREATE_ACCOUNTS, CREATE_JOURNAL, CREATE_JOURNAL_INDEX] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
        }
        info!("Ledger schema ready");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn find_account(&self, address: &WalletAddress) -> StoreResult<Option<Account>> {
        let row = sqlx::query(SELECT_ACCOUNT)
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn create_account(&self, address: &WalletAddress) -> StoreResult<Account> {
        let inserted = sqlx::query(INSERT_ACCOUNT)
            .bind(address.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        if inserted.rows_affected() > 0 {
            debug!(wallet = %address, "Created account");
        }

        self.find_account(address)
            .await?
            .ok_or_else(|| StoreError::NotFound(address.clone()))
    }

    async fn save_account(&self, account: &Account, entry: &JournalEntry) -> StoreResult<Account> {
        let expected = to_db_version(account.version)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row = sqlx::query(UPDATE_ACCOUNT)
            .bind(account.wallet_address.as_str())
            .bind(account.balance)
            .bind(account.updated_at)
            .bind(expected)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let Some(row) = row else {
            let current: Option<i64> = sqlx::query_scalar(SELECT_VERSION)
                .bind(account.wallet_address.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx)?;

            return match current {
                Some(found) => Err(StoreError::VersionConflict {
                    address: account.wallet_address.clone(),
                    expected: account.version,
                    found: from_db_version(found)?,
                }),
                None => Err(StoreError::NotFound(account.wallet_address.clone())),
            };
        };
        let saved = account_from_row(&row)?;

        sqlx::query(INSERT_ENTRY)
            .bind(entry.id)
            .bind(*entry.operation_id.as_uuid())
            .bind(entry.wallet_address.as_str())
            .bind(entry.entry_type.as_str())
            .bind(entry.amount)
            .bind(entry.balance_after)
            .bind(entry.tx_hash.as_deref())
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(saved)
    }

    async fn history(&self, address: &WalletAddress) -> StoreResult<Vec<JournalEntry>> {
        let rows = sqlx::query(SELECT_HISTORY)
            .bind(address.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn lease(&self, address: &WalletAddress) -> StoreResult<AccountLease> {
        let slot = self
            .lease_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Unavailable("lease slots closed".to_string()))?;
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;

        sqlx::query(ADVISORY_LOCK)
            .bind(address.as_str())
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx)?;

        Ok(AccountLease::Advisory(AdvisoryLease {
            address: address.clone(),
            conn: Some(conn),
            _slot: slot,
        }))
    }
}

/// Session-level advisory lock on one account.
///
/// The lock lives on the pooled connection that took it. A lease dropped
/// without [`AdvisoryLease::release`] detaches that connection from the pool
/// so the lock ends with the session instead of leaking to the next borrower.
/// The lease slot is returned once the connection is gone.
#[derive(Debug)]
pub struct AdvisoryLease {
    address: WalletAddress,
    conn: Option<PoolConnection<Postgres>>,
    _slot: OwnedSemaphorePermit,
}

impl AdvisoryLease {
    /// Unlock and return the connection to the pool.
    pub async fn release(mut self) -> StoreResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let unlocked = sqlx::query_scalar::<_, bool>(ADVISORY_UNLOCK)
            .bind(self.address.as_str())
            .fetch_one(&mut *conn)
            .await;

        match unlocked {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(wallet = %self.address, "Advisory lock was not held at release");
                Ok(())
            }
            Err(e) => {
                // Session state is unknown; do not hand it back to the pool.
                drop(conn.detach());
                Err(map_sqlx(e))
            }
        }
    }
}

impl Drop for AdvisoryLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(wallet = %self.address, "Advisory lease dropped unreleased, closing session");
            drop(conn.detach());
        }
    }
}

/// One connection stays outside the lease cap for work done under a lease.
fn lease_slots_for(max_connections: u32) -> usize {
    max_connections.saturating_sub(1).max(1) as usize
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    if let Some(db) = err.as_database_error() {
        if db.code().as_deref() == Some(CHECK_VIOLATION) {
            return StoreError::Constraint(db.message().to_string());
        }
    }
    StoreError::Unavailable(err.to_string())
}

fn to_db_version(version: u64) -> StoreResult<i64> {
    i64::try_from(version)
        .map_err(|_| StoreError::Constraint(format!("version {version} out of range")))
}

fn from_db_version(version: i64) -> StoreResult<u64> {
    u64::try_from(version)
        .map_err(|_| StoreError::Constraint(format!("stored version {version} is negative")))
}

fn parse_address(raw: &str) -> StoreResult<WalletAddress> {
    WalletAddress::parse(raw)
        .map_err(|e| StoreError::Constraint(format!("stored address {raw:?}: {e}")))
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    let address: String = row.try_get("wallet_address").map_err(map_sqlx)?;
    let version: i64 = row.try_get("version").map_err(map_sqlx)?;

    Ok(Account {
        wallet_address: parse_address(&address)?,
        balance: row.try_get::<Decimal, _>("balance").map_err(map_sqlx)?,
        version: from_db_version(version)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(map_sqlx)?,
    })
}

fn entry_from_row(row: &PgRow) -> StoreResult<JournalEntry> {
    let address: String = row.try_get("wallet_address").map_err(map_sqlx)?;
    let entry_type: String = row.try_get("entry_type").map_err(map_sqlx)?;

    Ok(JournalEntry {
        id: row.try_get::<Uuid, _>("id").map_err(map_sqlx)?,
        operation_id: OperationId::from_uuid(
            row.try_get::<Uuid, _>("operation_id").map_err(map_sqlx)?,
        ),
        wallet_address: parse_address(&address)?,
        entry_type: entry_type
            .parse::<EntryType>()
            .map_err(StoreError::Constraint)?,
        amount: row.try_get::<Decimal, _>("amount").map_err(map_sqlx)?,
        balance_after: row.try_get::<Decimal, _>("balance_after").map_err(map_sqlx)?,
        tx_hash: row.try_get::<Option<String>, _>("tx_hash").map_err(map_sqlx)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(map_sqlx)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethsettle_common::EthAmount;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn database(max_connections: u32) -> Option<PgLedgerStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        Some(PgLedgerStore::connect(&url, max_connections).await.unwrap())
    }

    fn fresh_address() -> WalletAddress {
        WalletAddress::parse(&format!("0x{:0>40}", Uuid::new_v4().simple())).unwrap()
    }

    fn credit(account: &Account, amount: &str) -> (Account, JournalEntry) {
        let amount = EthAmount::parse(amount).unwrap();
        let updated = account.credited(&amount).unwrap();
        let entry = JournalEntry::credit(OperationId::new(), &updated, amount.value());
        (updated, entry)
    }

    #[test]
    fn test_lease_slots_leave_one_connection() {
        assert_eq!(lease_slots_for(10), 9);
        assert_eq!(lease_slots_for(2), 1);
        assert_eq!(lease_slots_for(1), 1);
        assert_eq!(lease_slots_for(0), 1);
    }

    #[tokio::test]
    async fn test_store_caps_leases_below_pool_size() {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect_lazy("postgres://localhost/ethsettle")
            .unwrap();
        let store = PgLedgerStore::from_pool(pool);

        assert_eq!(store.available_lease_slots(), 3);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_stale_save_is_a_version_conflict() {
        let Some(store) = database(3).await else {
            return;
        };
        let addr = fresh_address();
        let account = store.create_account(&addr).await.unwrap();

        let (first, entry) = credit(&account, "1");
        let saved = store.save_account(&first, &entry).await.unwrap();
        assert_eq!(saved.version, 1);

        let (stale, entry) = credit(&account, "2");
        let err = store.save_account(&stale, &entry).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::VersionConflict {
                address: addr.clone(),
                expected: 0,
                found: 1,
            }
        );

        let stored = store.find_account(&addr).await.unwrap().unwrap();
        assert_eq!(stored.balance, Decimal::ONE);
        assert_eq!(store.history(&addr).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_advisory_lease_is_exclusive() {
        let Some(store) = database(3).await else {
            return;
        };
        let addr = fresh_address();
        let first = store.lease(&addr).await.unwrap();

        let waiting = tokio::spawn({
            let store = store.clone();
            let addr = addr.clone();
            async move { store.lease(&addr).await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!waiting.is_finished());

        first.release().await.unwrap();
        let second = timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        second.release().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn test_full_lease_cap_does_not_starve_writes() {
        let Some(store) = database(4).await else {
            return;
        };
        let wallets: Vec<_> = (0..4).map(|_| fresh_address()).collect();
        for addr in &wallets {
            store.create_account(addr).await.unwrap();
        }

        let mut leases = Vec::new();
        for addr in &wallets[..3] {
            leases.push(store.lease(addr).await.unwrap());
        }
        assert_eq!(store.available_lease_slots(), 0);

        // Work under every held lease still gets a connection.
        for addr in &wallets[..3] {
            let account = timeout(Duration::from_secs(5), store.find_account(addr))
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let (updated, entry) = credit(&account, "0.5");
            timeout(Duration::from_secs(5), store.save_account(&updated, &entry))
                .await
                .unwrap()
                .unwrap();
        }

        let queued = tokio::spawn({
            let store = store.clone();
            let addr = wallets[3].clone();
            async move { store.lease(&addr).await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!queued.is_finished());

        for lease in leases {
            lease.release().await.unwrap();
        }
        let last = timeout(Duration::from_secs(5), queued)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        last.release().await.unwrap();
        assert_eq!(store.available_lease_slots(), 3);
    }

    #[test]
    fn test_version_conversion_bounds() {
        assert_eq!(to_db_version(7).unwrap(), 7);
        assert!(to_db_version(u64::MAX).is_err());
        assert_eq!(from_db_version(3).unwrap(), 3);
        assert!(from_db_version(-1).is_err());
    }

    #[test]
    fn test_non_database_errors_are_unavailable() {
        let err = map_sqlx(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_stored_address_must_be_canonical() {
        assert!(parse_address("0x00000000000000000000000000000000000000aa").is_ok());
        assert!(matches!(
            parse_address("not-an-address"),
            Err(StoreError::Constraint(_))
        ));
    }
}
