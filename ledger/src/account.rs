//! Account definitions for ledger.

use chrono::{DateTime, Utc};
use ethsettle_common::{AmountError, EthAmount, SettleError, WalletAddress};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ledger account: the off-chain balance of one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Normalized wallet address (the storage key).
    pub wallet_address: WalletAddress,
    /// Available balance in ETH. Never negative at rest.
    pub balance: Decimal,
    /// Store version, bumped on every save. Used for compare-and-swap.
    pub version: u64,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance.
    pub fn new(wallet_address: WalletAddress) -> Self {
        let now = Utc::now();

        Self {
            wallet_address,
            balance: Decimal::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can cover a withdrawal.
    pub fn has_sufficient_funds(&self, amount: &EthAmount) -> bool {
        self.balance >= amount.value()
    }

    /// Copy of this account with `amount` added.
    ///
    /// The version is left unchanged; the store bumps it on save.
    pub fn credited(&self, amount: &EthAmount) -> Result<Self, SettleError> {
        let balance = self.balance.checked_add(amount.value()).ok_or_else(|| {
            SettleError::InvalidAmount(AmountError::Overflow(amount.to_string()))
        })?;

        Ok(Self {
            balance,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }

    /// Copy of this account with `amount` removed.
    pub fn debited(&self, amount: &EthAmount) -> Result<Self, SettleError> {
        if !self.has_sufficient_funds(amount) {
            return Err(SettleError::InsufficientBalance {
                required: amount.value(),
                available: self.balance,
            });
        }

        Ok(Self {
            balance: self.balance - amount.value(),
            updated_at: Utc::now(),
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new(WalletAddress::parse("0x00000000000000000000000000000000000000aa").unwrap())
    }

    fn eth(s: &str) -> EthAmount {
        EthAmount::parse(s).unwrap()
    }

    #[test]
    fn test_new_account_is_empty() {
        let account = account();
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.version, 0);
    }

    #[test]
    fn test_credit_then_debit() {
        let account = account().credited(&eth("1.0")).unwrap();
        assert_eq!(account.balance, Decimal::ONE);

        let account = account.debited(&eth("0.4")).unwrap();
        assert_eq!(account.balance, Decimal::from_str_exact("0.6").unwrap());
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let account = account().credited(&eth("0.5")).unwrap();
        let err = account.debited(&eth("0.6")).unwrap_err();

        assert_eq!(
            err,
            SettleError::InsufficientBalance {
                required: Decimal::from_str_exact("0.6").unwrap(),
                available: Decimal::from_str_exact("0.5").unwrap(),
            }
        );
    }

    #[test]
    fn test_exact_balance_can_be_withdrawn() {
        let account = account().credited(&eth("4")).unwrap();
        let account = account.debited(&eth("4.0")).unwrap();
        assert!(account.balance.is_zero());
    }

    #[test]
    fn test_credit_overflow_is_rejected() {
        let full = Account {
            balance: Decimal::MAX,
            ..account()
        };
        let err = full.credited(&eth("1")).unwrap_err();

        assert!(matches!(
            err,
            SettleError::InvalidAmount(AmountError::Overflow(_))
        ));
        assert_eq!(full.balance, Decimal::MAX);
    }
}
