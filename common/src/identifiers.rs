//! Identifier types for ledger entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Number of hex digits in an EVM address (20 bytes).
const ADDRESS_HEX_LEN: usize = 40;

/// Error returned when a wallet address cannot be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("wallet address is empty")]
    Empty,
    #[error("wallet address must start with 0x: {0}")]
    MissingPrefix(String),
    #[error("wallet address must have 40 hex digits, got {0}")]
    InvalidLength(usize),
    #[error("wallet address contains non-hex characters: {0}")]
    InvalidCharacters(String),
}

/// A wallet address in canonical lowercase form.
///
/// Two inputs that differ only in letter case produce equal values, so this
/// type is the only key used for storage, locking and comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Parse and normalize a wallet address.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| AddressError::MissingPrefix(trimmed.to_string()))?;

        if digits.len() != ADDRESS_HEX_LEN {
            return Err(AddressError::InvalidLength(digits.len()));
        }

        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidCharacters(trimmed.to_string()));
        }

        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// Get the normalized address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WalletAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(address: WalletAddress) -> Self {
        address.0
    }
}

impl AsRef<str> for WalletAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a single deposit or withdrawal.
/// Uses UUID v7 so identifiers sort by creation time in logs and the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new operation ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = "0xAbCdEf0123456789aBcDeF0123456789AbCdEf01";

    #[test]
    fn test_address_normalizes_case() {
        let upper = WalletAddress::parse(&MIXED.to_uppercase().replacen("0X", "0x", 1)).unwrap();
        let lower = WalletAddress::parse(&MIXED.to_lowercase()).unwrap();
        let mixed = WalletAddress::parse(MIXED).unwrap();

        assert_eq!(upper, lower);
        assert_eq!(mixed, lower);
        assert_eq!(mixed.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_address_accepts_upper_prefix_and_whitespace() {
        let addr = WalletAddress::parse("  0XABCDEF0123456789ABCDEF0123456789ABCDEF01\n").unwrap();
        assert_eq!(addr.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert_eq!(WalletAddress::parse("   "), Err(AddressError::Empty));
        assert!(matches!(
            WalletAddress::parse("abcdef0123456789abcdef0123456789abcdef01"),
            Err(AddressError::MissingPrefix(_))
        ));
        assert_eq!(
            WalletAddress::parse("0x1234"),
            Err(AddressError::InvalidLength(4))
        );
        assert!(matches!(
            WalletAddress::parse("0xzzcdef0123456789abcdef0123456789abcdef01"),
            Err(AddressError::InvalidCharacters(_))
        ));
    }

    #[test]
    fn test_address_serde_normalizes() {
        let json = format!("\"{}\"", MIXED);
        let addr: WalletAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(addr.as_str(), MIXED.to_lowercase());

        let back = serde_json::to_string(&addr).unwrap();
        assert_eq!(back, format!("\"{}\"", MIXED.to_lowercase()));

        assert!(serde_json::from_str::<WalletAddress>("\"0x12\"").is_err());
    }

    #[test]
    fn test_operation_id_creation() {
        let id1 = OperationId::new();
        let id2 = OperationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_operation_id_parse() {
        let uuid_str = "019456ab-1234-7def-8901-234567890abc";
        let id = OperationId::parse(uuid_str).unwrap();
        assert_eq!(id.to_string(), uuid_str);
    }
}
