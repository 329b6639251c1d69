//! ETH amounts and their conversion to wei.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits between ETH and wei (1 ETH = 10^18 wei).
pub const WEI_DECIMALS: u32 = 18;

/// Error returned when an amount cannot be used for a ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is missing")]
    Empty,
    #[error("amount is not a decimal number: {0}")]
    Malformed(String),
    #[error("amount must be greater than zero: {0}")]
    NotPositive(String),
    #[error("amount has more than {max} fractional digits: {input}")]
    TooPrecise { input: String, max: u32 },
    #[error("amount does not fit in wei: {0}")]
    Overflow(String),
}

/// A strictly positive amount of ETH.
///
/// Construction goes through [`EthAmount::parse`] or
/// [`EthAmount::from_decimal`], so a value of this type always satisfies the
/// preconditions of deposit and withdraw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EthAmount(Decimal);

impl EthAmount {
    /// Parse a user-supplied amount.
    ///
    /// Both `.` and `,` are accepted as the decimal separator. At most one
    /// separator may appear; signs other than a leading `+`/`-`, exponents,
    /// underscores and thousands grouping are rejected.
    pub fn parse(raw: &str) -> Result<Self, AmountError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AmountError::Empty);
        }

        let (sign, body) = match trimmed.as_bytes()[0] {
            b'+' => ("", &trimmed[1..]),
            b'-' => ("-", &trimmed[1..]),
            _ => ("", trimmed),
        };

        let separators = body.chars().filter(|c| *c == '.' || *c == ',').count();
        let digits = body.chars().filter(|c| c.is_ascii_digit()).count();
        if separators > 1 || digits == 0 || digits + separators != body.len() {
            return Err(AmountError::Malformed(trimmed.to_string()));
        }

        let mut canonical = String::with_capacity(body.len() + 2);
        canonical.push_str(sign);
        if body.starts_with(['.', ',']) {
            canonical.push('0');
        }
        canonical.push_str(&body.replace(',', "."));
        if canonical.ends_with('.') {
            canonical.pop();
        }

        let value = Decimal::from_str(&canonical)
            .map_err(|_| AmountError::Malformed(trimmed.to_string()))?;

        Self::from_decimal(value).map_err(|e| match e {
            AmountError::NotPositive(_) => AmountError::NotPositive(trimmed.to_string()),
            AmountError::TooPrecise { max, .. } => AmountError::TooPrecise {
                input: trimmed.to_string(),
                max,
            },
            AmountError::Overflow(_) => AmountError::Overflow(trimmed.to_string()),
            other => other,
        })
    }

    /// Build from an already-parsed decimal.
    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value.to_string()));
        }

        let value = value.normalize();
        if value.scale() > WEI_DECIMALS {
            return Err(AmountError::TooPrecise {
                input: value.to_string(),
                max: WEI_DECIMALS,
            });
        }

        // Anything accepted here must be payable on chain.
        let amount = Self(value);
        amount.to_wei()?;
        Ok(amount)
    }

    /// Get the amount in ETH.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Convert to the integer base unit expected by the chain.
    pub fn to_wei(&self) -> Result<u128, AmountError> {
        let mantissa = u128::try_from(self.0.mantissa())
            .map_err(|_| AmountError::Overflow(self.0.to_string()))?;
        let factor = 10u128.pow(WEI_DECIMALS - self.0.scale());

        mantissa
            .checked_mul(factor)
            .ok_or_else(|| AmountError::Overflow(self.0.to_string()))
    }
}

impl fmt::Display for EthAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EthAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<EthAmount> for Decimal {
    fn from(amount: EthAmount) -> Self {
        amount.0
    }
}

/// An amount as it arrives in a request body: either a JSON string
/// (`"1,5"`) or a JSON number (`1.5`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Text(String),
    Number(serde_json::Number),
}

impl RawAmount {
    /// Validate into an [`EthAmount`].
    pub fn parse(&self) -> Result<EthAmount, AmountError> {
        match self {
            RawAmount::Text(text) => EthAmount::parse(text),
            RawAmount::Number(number) => {
                let text = number.to_string();
                if text.contains(['e', 'E']) {
                    let value = Decimal::from_scientific(&text)
                        .map_err(|_| AmountError::Malformed(text.clone()))?;
                    EthAmount::from_decimal(value)
                } else {
                    EthAmount::parse(&text)
                }
            }
        }
    }
}

impl From<&str> for RawAmount {
    fn from(s: &str) -> Self {
        RawAmount::Text(s.to_string())
    }
}
