//! Journal entries recording every committed balance change.

use chrono::{DateTime, Utc};
use ethsettle_common::{OperationId, WalletAddress};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::account::Account;

/// Type of journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// Deposit into the wallet's balance.
    Credit,
    /// Withdrawal settled on chain.
    Debit,
}

impl EntryType {
    /// Storage label.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Credit => "CREDIT",
            EntryType::Debit => "DEBIT",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREDIT" => Ok(EntryType::Credit),
            "DEBIT" => Ok(EntryType::Debit),
            other => Err(format!("unknown journal entry type: {other}")),
        }
    }
}

/// A single journal entry in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Unique entry ID.
    pub id: Uuid,
    /// Operation that produced this entry.
    pub operation_id: OperationId,
    /// Account affected.
    pub wallet_address: WalletAddress,
    /// Entry type (credit or debit).
    pub entry_type: EntryType,
    /// Amount in ETH, always positive.
    pub amount: Decimal,
    /// Balance after this entry.
    pub balance_after: Decimal,
    /// Chain transaction hash for settled withdrawals.
    pub tx_hash: Option<String>,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Create a credit entry for an account that has already been credited.
    pub fn credit(operation_id: OperationId, account_after: &Account, amount: Decimal) -> Self {
        Self::new(operation_id, account_after, EntryType::Credit, amount, None)
    }

    /// Create a debit entry for an account that has already been debited.
    pub fn debit(
        operation_id: OperationId,
        account_after: &Account,
        amount: Decimal,
        tx_hash: Option<String>,
    ) -> Self {
        Self::new(operation_id, account_after, EntryType::Debit, amount, tx_hash)
    }

    fn new(
        operation_id: OperationId,
        account_after: &Account,
        entry_type: EntryType,
        amount: Decimal,
        tx_hash: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation_id,
            wallet_address: account_after.wallet_address.clone(),
            entry_type,
            amount,
            balance_after: account_after.balance,
            tx_hash,
            created_at: Utc::now(),
        }
    }

    /// Signed effect on the balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            EntryType::Credit => self.amount,
            EntryType::Debit => -self.amount,
        }
    }
}

/// Replay a wallet's journal from a zero balance.
pub fn replay(entries: &[JournalEntry]) -> Decimal {
    entries.iter().map(JournalEntry::signed_amount).sum()
}

/// Check that each entry's `balance_after` follows from the previous one.
pub fn is_consistent(entries: &[JournalEntry]) -> bool {
    let mut running = Decimal::ZERO;
    for entry in entries {
        running += entry.signed_amount();
        if running != entry.balance_after || running < Decimal::ZERO {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethsettle_common::EthAmount;

    fn account() -> Account {
        Account::new(WalletAddress::parse("0x00000000000000000000000000000000000000bb").unwrap())
    }

    #[test]
    fn test_consistent_history() {
        let op = OperationId::new();
        let deposit = EthAmount::parse("2.5").unwrap();
        let withdrawal = EthAmount::parse("1").unwrap();

        let after_credit = account().credited(&deposit).unwrap();
        let after_debit = after_credit.debited(&withdrawal).unwrap();

        let entries = vec![
            JournalEntry::credit(op, &after_credit, deposit.value()),
            JournalEntry::debit(op, &after_debit, withdrawal.value(), Some("0xfeed".into())),
        ];

        assert!(is_consistent(&entries));
        assert_eq!(replay(&entries), Decimal::from_str_exact("1.5").unwrap());
        assert_eq!(entries[1].tx_hash.as_deref(), Some("0xfeed"));
    }

    #[test]
    fn test_inconsistent_history() {
        let op = OperationId::new();
        let mut entry = JournalEntry::credit(op, &account(), Decimal::ONE);
        entry.balance_after = Decimal::TWO;

        assert!(!is_consistent(&[entry]));
    }

    #[test]
    fn test_entry_type_round_trip() {
        assert_eq!("CREDIT".parse::<EntryType>().unwrap(), EntryType::Credit);
        assert_eq!(EntryType::Debit.to_string(), "DEBIT");
        assert!("TRANSFER".parse::<EntryType>().is_err());
    }
}
