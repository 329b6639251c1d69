//! EthSettle Coordinator
//!
//! The coordinator owns each wallet's ETH balance. Deposits credit the ledger
//! directly. Withdrawals are paid out on chain first and debited from the
//! ledger only after the chain confirms.

pub mod config;
pub mod coordinator;
pub mod lock_manager;
pub mod metrics;
pub mod request;
pub mod state;
pub mod withdrawal;
pub mod withdrawal_processor;

pub use config::CoordinatorConfig;
pub use coordinator::SettlementCoordinator;
pub use request::{CreateAccountRequest, DepositRequest, WithdrawRequest};
pub use state::CoordinatorState;
