//! The chain settlement service interface.

use async_trait::async_trait;
use ethsettle_common::{ChainFailureKind, WalletAddress};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Confirmation of a mined, successful withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReceipt {
    /// Transaction hash, 0x-prefixed hex.
    pub tx_hash: String,
    /// Block the transaction was mined in, if reported.
    pub block_number: Option<u64>,
}

/// Outcome of a withdrawal that did not confirm.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The chain reported insufficient funds for the transfer.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The node refused the transaction before it was submitted.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The transaction was mined but reverted.
    #[error("reverted: {0}")]
    Reverted(String),

    /// The endpoint could not be reached; nothing was submitted.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The transaction may have been submitted but its outcome is not known.
    #[error("indeterminate: {0}")]
    Indeterminate(String),
}

impl ChainError {
    /// Failure kind for a definite failure, `None` when the outcome is unknown.
    pub fn failure_kind(&self) -> Option<ChainFailureKind> {
        match self {
            ChainError::InsufficientFunds(_) => Some(ChainFailureKind::InsufficientFunds),
            ChainError::Rejected(_) => Some(ChainFailureKind::Rejected),
            ChainError::Reverted(_) => Some(ChainFailureKind::Reverted),
            ChainError::Unavailable(_) => Some(ChainFailureKind::Unavailable),
            ChainError::Indeterminate(_) => None,
        }
    }

    /// Message from the chain layer.
    pub fn message(&self) -> &str {
        match self {
            ChainError::InsufficientFunds(m)
            | ChainError::Rejected(m)
            | ChainError::Reverted(m)
            | ChainError::Unavailable(m)
            | ChainError::Indeterminate(m) => m,
        }
    }
}

/// External service executing the irreversible on-chain withdrawal.
///
/// Implementations own their connection and reconnect policy. A call is never
/// retried by the caller; a single invocation may submit at most one
/// transaction.
#[async_trait]
pub trait ChainSettlementService: Send + Sync {
    /// Name of the service for logs.
    fn name(&self) -> &str;

    /// Withdraw `amount_wei` from the vault to `wallet`.
    async fn withdraw(
        &self,
        wallet: &WalletAddress,
        amount_wei: u128,
    ) -> Result<ChainReceipt, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_indeterminate_has_no_kind() {
        assert_eq!(
            ChainError::InsufficientFunds("vault".into()).failure_kind(),
            Some(ChainFailureKind::InsufficientFunds)
        );
        assert_eq!(
            ChainError::Reverted("status 0".into()).failure_kind(),
            Some(ChainFailureKind::Reverted)
        );
        assert_eq!(ChainError::Indeterminate("timeout".into()).failure_kind(), None);
    }

    #[test]
    fn test_message_is_preserved() {
        let err = ChainError::Rejected("nonce too low".into());
        assert_eq!(err.message(), "nonce too low");
        assert_eq!(err.to_string(), "rejected: nonce too low");
    }
}
