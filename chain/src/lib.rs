//! EthSettle Chain Settlement Service
//!
//! The interface the coordinator uses to execute irreversible on-chain
//! withdrawals, an alloy client for the settlement vault contract, and a
//! simulated chain for tests and load simulation.

pub mod config;
pub mod contract;
pub mod service;
pub mod simulated;

pub use config::ChainConfig;
pub use contract::{ClientState, VaultContractClient};
pub use service::{ChainError, ChainReceipt, ChainSettlementService};
pub use simulated::{SimulatedChain, SimulatedOutcome, SimulatedWithdrawal};
