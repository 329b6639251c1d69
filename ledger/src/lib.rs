//! EthSettle Ledger
//!
//! Durable per-wallet balances keyed by normalized address, with an audit
//! journal written atomically alongside every balance change.

pub mod account;
pub mod engine;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod store;

pub use account::Account;
pub use engine::{LedgerEngine, StoreRetryPolicy};
pub use journal::{EntryType, JournalEntry};
pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use store::{AccountLease, LedgerStore, StoreError, StoreResult};
