//! Withdrawal attempt lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use ethsettle_common::{EthAmount, OperationId, WalletAddress};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phase of a single withdrawal attempt.
///
/// ```text
/// Validated -> ChainCallInFlight -> ChainConfirmed -> LedgerUpdated
///                                |                 \-> Inconsistent
///                                |-> ChainFailed
///                                \-> ChainUnknown -> ChainConfirmed | ChainFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalPhase {
    /// Balance re-checked against the persisted account under the lock.
    Validated,
    /// Chain call issued, outcome pending.
    ChainCallInFlight,
    /// Chain reported success; ledger not yet updated.
    ChainConfirmed,
    /// Ledger debited (terminal success).
    LedgerUpdated,
    /// Chain reported failure; ledger untouched (terminal).
    ChainFailed,
    /// No outcome before the deadline. A late outcome may still arrive.
    ChainUnknown,
    /// Chain succeeded but the ledger could not record it (terminal).
    Inconsistent,
}

impl WithdrawalPhase {
    /// Check if this phase is final.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            WithdrawalPhase::LedgerUpdated
                | WithdrawalPhase::ChainFailed
                | WithdrawalPhase::Inconsistent
        )
    }

    /// Get valid next phases from the current phase.
    pub fn valid_transitions(&self) -> &[WithdrawalPhase] {
        match self {
            WithdrawalPhase::Validated => &[WithdrawalPhase::ChainCallInFlight],
            WithdrawalPhase::ChainCallInFlight => &[
                WithdrawalPhase::ChainConfirmed,
                WithdrawalPhase::ChainFailed,
                WithdrawalPhase::ChainUnknown,
            ],
            WithdrawalPhase::ChainConfirmed => {
                &[WithdrawalPhase::LedgerUpdated, WithdrawalPhase::Inconsistent]
            }
            WithdrawalPhase::ChainUnknown => {
                &[WithdrawalPhase::ChainConfirmed, WithdrawalPhase::ChainFailed]
            }
            WithdrawalPhase::LedgerUpdated => &[],
            WithdrawalPhase::ChainFailed => &[],
            WithdrawalPhase::Inconsistent => &[],
        }
    }

    /// Check if transition to the given phase is valid.
    pub fn can_transition_to(&self, next: WithdrawalPhase) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for WithdrawalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WithdrawalPhase::Validated => "VALIDATED",
            WithdrawalPhase::ChainCallInFlight => "CHAIN_CALL_IN_FLIGHT",
            WithdrawalPhase::ChainConfirmed => "CHAIN_CONFIRMED",
            WithdrawalPhase::LedgerUpdated => "LEDGER_UPDATED",
            WithdrawalPhase::ChainFailed => "CHAIN_FAILED",
            WithdrawalPhase::ChainUnknown => "CHAIN_UNKNOWN",
            WithdrawalPhase::Inconsistent => "INCONSISTENT",
        };
        f.write_str(label)
    }
}

/// Error for an invalid phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid withdrawal transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: WithdrawalPhase,
    pub to: WithdrawalPhase,
}

/// One withdrawal attempt, tracked from validation to its final phase.
#[derive(Debug, Clone, Serialize)]
pub struct Withdrawal {
    /// Operation identifier, carried into the journal and logs.
    pub operation_id: OperationId,
    /// Wallet being paid out.
    pub wallet: WalletAddress,
    /// Amount in ETH.
    pub amount: EthAmount,
    /// Amount in wei as sent to the chain.
    pub amount_wei: u128,
    /// Current phase.
    pub phase: WithdrawalPhase,
    /// Chain transaction hash once confirmed.
    pub tx_hash: Option<String>,
    /// When the attempt was validated.
    pub started_at: DateTime<Utc>,
    /// When the phase last changed.
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    /// Start tracking a validated withdrawal.
    pub fn new(
        operation_id: OperationId,
        wallet: WalletAddress,
        amount: EthAmount,
        amount_wei: u128,
    ) -> Self {
        let now = Utc::now();
        Self {
            operation_id,
            wallet,
            amount,
            amount_wei,
            phase: WithdrawalPhase::Validated,
            tx_hash: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new phase.
    pub fn transition_to(&mut self, next: WithdrawalPhase) -> Result<(), InvalidTransition> {
        if !self.phase.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.phase,
                to: next,
            });
        }

        self.phase = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_withdrawal() -> Withdrawal {
        Withdrawal::new(
            OperationId::new(),
            WalletAddress::parse("0x00000000000000000000000000000000000000ee").unwrap(),
            EthAmount::parse("1").unwrap(),
            1_000_000_000_000_000_000,
        )
    }

    #[test]
    fn test_success_path() {
        let mut withdrawal = create_test_withdrawal();

        assert!(withdrawal
            .transition_to(WithdrawalPhase::ChainCallInFlight)
            .is_ok());
        assert!(withdrawal
            .transition_to(WithdrawalPhase::ChainConfirmed)
            .is_ok());
        assert!(withdrawal
            .transition_to(WithdrawalPhase::LedgerUpdated)
            .is_ok());
        assert!(withdrawal.phase.is_final());
    }

    #[test]
    fn test_late_confirmation_path() {
        let mut withdrawal = create_test_withdrawal();

        withdrawal
            .transition_to(WithdrawalPhase::ChainCallInFlight)
            .unwrap();
        withdrawal.transition_to(WithdrawalPhase::ChainUnknown).unwrap();
        assert!(!withdrawal.phase.is_final());

        withdrawal
            .transition_to(WithdrawalPhase::ChainConfirmed)
            .unwrap();
        withdrawal.transition_to(WithdrawalPhase::Inconsistent).unwrap();
        assert!(withdrawal.phase.is_final());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut withdrawal = create_test_withdrawal();

        // The ledger is never touched before the chain confirms.
        assert_eq!(
            withdrawal.transition_to(WithdrawalPhase::LedgerUpdated),
            Err(InvalidTransition {
                from: WithdrawalPhase::Validated,
                to: WithdrawalPhase::LedgerUpdated,
            })
        );

        withdrawal
            .transition_to(WithdrawalPhase::ChainCallInFlight)
            .unwrap();
        withdrawal.transition_to(WithdrawalPhase::ChainFailed).unwrap();
        assert!(withdrawal
            .transition_to(WithdrawalPhase::ChainConfirmed)
            .is_err());
    }
}
