//! Error types for ledger and settlement operations.

use crate::{AddressError, AmountError, OperationId, WalletAddress};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why the chain settlement service refused or failed a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainFailureKind {
    /// The chain reported insufficient funds for the transfer.
    InsufficientFunds,
    /// The transaction was mined but reverted.
    Reverted,
    /// The node refused the transaction before submission.
    Rejected,
    /// The chain endpoint could not be reached before submission.
    Unavailable,
}

impl fmt::Display for ChainFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChainFailureKind::InsufficientFunds => "insufficient funds",
            ChainFailureKind::Reverted => "reverted",
            ChainFailureKind::Rejected => "rejected",
            ChainFailureKind::Unavailable => "unavailable",
        };
        f.write_str(label)
    }
}

/// Main error type for settlement operations.
///
/// This is a closed set: callers match on the variant and never on the
/// rendered message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettleError {
    /// Amount missing, non-numeric, not positive, or not representable in wei.
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    /// Wallet address could not be normalized.
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// No account exists for the wallet.
    #[error("Account not found: {0}")]
    AccountNotFound(WalletAddress),

    /// Ledger balance is below the requested withdrawal.
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    /// The chain settlement call failed; the ledger was not touched.
    #[error("Chain call failed ({kind}): {message}")]
    ChainCallFailed {
        kind: ChainFailureKind,
        message: String,
    },

    /// The chain call outcome is not known; funds may or may not have moved.
    #[error("Chain call outcome unknown for {wallet} ({amount} ETH, operation {operation_id})")]
    ChainCallUnknown {
        wallet: WalletAddress,
        amount: Decimal,
        operation_id: OperationId,
    },

    /// The chain confirmed the withdrawal but the ledger could not record it.
    #[error(
        "Settlement persisted on chain but not in ledger for {wallet} ({amount} ETH, tx {tx_hash}, operation {operation_id}): {cause}"
    )]
    SettlementPersistMismatch {
        wallet: WalletAddress,
        amount: Decimal,
        tx_hash: String,
        operation_id: OperationId,
        cause: String,
    },

    /// Ledger store read or write failed after retries.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Coordinator is draining and no longer accepts operations.
    #[error("Coordinator is shutting down")]
    ShuttingDown,
}

impl SettleError {
    /// Check if the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettleError::ChainCallFailed { .. }
                | SettleError::StoreUnavailable(_)
                | SettleError::ShuttingDown
        )
    }

    /// Check if an operator must reconcile the ledger against the chain.
    pub fn requires_reconciliation(&self) -> bool {
        matches!(
            self,
            SettleError::ChainCallUnknown { .. } | SettleError::SettlementPersistMismatch { .. }
        )
    }

    /// Get a stable error code for callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            SettleError::InvalidAmount(_) => "INVALID_AMOUNT",
            SettleError::InvalidAddress(_) => "INVALID_ADDRESS",
            SettleError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            SettleError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            SettleError::ChainCallFailed { .. } => "CHAIN_CALL_FAILED",
            SettleError::ChainCallUnknown { .. } => "CHAIN_CALL_UNKNOWN",
            SettleError::SettlementPersistMismatch { .. } => "SETTLEMENT_PERSIST_MISMATCH",
            SettleError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            SettleError::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

/// Result type alias for settlement operations.
pub type Result<T> = std::result::Result<T, SettleError>;
