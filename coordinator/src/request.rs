//! Typed request bodies validated at the coordinator boundary.

use ethsettle_common::{AmountError, EthAmount, RawAmount, Result, WalletAddress};
use serde::{Deserialize, Serialize};

/// Create-or-get an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    /// Wallet address in any letter case.
    pub wallet_address: String,
}

impl CreateAccountRequest {
    /// Create a request.
    pub fn new(wallet_address: impl Into<String>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
        }
    }

    /// Normalize the wallet address.
    pub fn validate(&self) -> Result<WalletAddress> {
        Ok(WalletAddress::parse(&self.wallet_address)?)
    }
}

/// Credit a wallet's balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    /// Wallet address in any letter case.
    pub wallet_address: String,
    /// Amount in ETH, as a string or number.
    #[serde(default)]
    pub amount: Option<RawAmount>,
}

impl DepositRequest {
    /// Create a request.
    pub fn new(wallet_address: impl Into<String>, amount: impl Into<RawAmount>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            amount: Some(amount.into()),
        }
    }

    /// Normalize the address and parse the amount.
    pub fn validate(&self) -> Result<(WalletAddress, EthAmount)> {
        validate_transfer(&self.wallet_address, self.amount.as_ref())
    }
}

/// Withdraw from a wallet's balance to the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    /// Wallet address in any letter case.
    pub wallet_address: String,
    /// Amount in ETH, as a string or number.
    #[serde(default)]
    pub amount: Option<RawAmount>,
}

impl WithdrawRequest {
    /// Create a request.
    pub fn new(wallet_address: impl Into<String>, amount: impl Into<RawAmount>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            amount: Some(amount.into()),
        }
    }

    /// Normalize the address and parse the amount.
    pub fn validate(&self) -> Result<(WalletAddress, EthAmount)> {
        validate_transfer(&self.wallet_address, self.amount.as_ref())
    }
}

fn validate_transfer(
    wallet_address: &str,
    amount: Option<&RawAmount>,
) -> Result<(WalletAddress, EthAmount)> {
    let wallet = WalletAddress::parse(wallet_address)?;
    let amount = amount.ok_or(AmountError::Empty)?.parse()?;
    Ok((wallet, amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethsettle_common::SettleError;
    use rust_decimal::Decimal;

    const ADDRESS: &str = "0xAbCdEf0000000000000000000000000000000001";

    #[test]
    fn test_deserialize_string_and_number_amounts() {
        let request: DepositRequest =
            serde_json::from_str(&format!(r#"{{"walletAddress":"{ADDRESS}","amount":"1,5"}}"#))
                .unwrap();
        let (wallet, amount) = request.validate().unwrap();
        assert_eq!(wallet.as_str(), ADDRESS.to_lowercase());
        assert_eq!(amount.value(), Decimal::from_str_exact("1.5").unwrap());

        let request: WithdrawRequest =
            serde_json::from_str(&format!(r#"{{"walletAddress":"{ADDRESS}","amount":0.25}}"#))
                .unwrap();
        let (_, amount) = request.validate().unwrap();
        assert_eq!(amount.value(), Decimal::from_str_exact("0.25").unwrap());
    }

    #[test]
    fn test_missing_amount_is_invalid() {
        let request: DepositRequest =
            serde_json::from_str(&format!(r#"{{"walletAddress":"{ADDRESS}"}}"#)).unwrap();

        assert!(matches!(
            request.validate(),
            Err(SettleError::InvalidAmount(AmountError::Empty))
        ));
    }

    #[test]
    fn test_bad_inputs_are_typed() {
        assert!(matches!(
            WithdrawRequest::new(ADDRESS, "0").validate(),
            Err(SettleError::InvalidAmount(_))
        ));
        assert!(matches!(
            WithdrawRequest::new(ADDRESS, "-1").validate(),
            Err(SettleError::InvalidAmount(_))
        ));
        assert!(matches!(
            DepositRequest::new("0x123", "1").validate(),
            Err(SettleError::InvalidAddress(_))
        ));
        assert!(matches!(
            CreateAccountRequest::new("wallet").validate(),
            Err(SettleError::InvalidAddress(_))
        ));
    }
}
