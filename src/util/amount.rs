//! Amount parsing helpers.
//!
//! Two distinct concerns live here:
//!
//! - [`MoneyAmount`]: parses human-readable decimal strings (`"$10.50"`,
//!   `"1,000"`) into a scaled mantissa, used by chain token-deployment helpers
//!   to build [`crate::chain::DeployedTokenAmount`] values from operator input.
//! - [`Amount`]: the wire-level opaque amount. The protocol never treats an
//!   amount as a fractional currency value, only as a base-10 integer string
//!   of smallest units, so it round-trips as `u128` with no scale/decimals
//!   concept at all.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A parsed human-readable monetary amount, e.g. `"$10.50"` or `"1,000.25"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoneyAmount(Decimal);

impl MoneyAmount {
    /// Number of digits after the decimal point.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// The unscaled integer digits (i.e. `self.0 * 10^scale`).
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("could not parse '{0}' as a decimal amount")]
    InvalidFormat(String),
    #[error("amount has {money} decimal places, but the token only supports {token}")]
    WrongPrecision { money: u32, token: u32 },
}

fn strip_decoration(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect()
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = strip_decoration(s.trim());
        let decimal = Decimal::from_str(&cleaned)
            .map_err(|_| MoneyAmountParseError::InvalidFormat(s.to_string()))?;
        Ok(MoneyAmount(decimal.normalize()))
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value)
    }
}

impl TryFrom<String> for MoneyAmount {
    type Error = MoneyAmountParseError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

/// The wire-level amount carried in `PaymentRequirements`/`PaymentPayload`.
///
/// Always smallest-units, never a fractional currency value. Serializes as
/// the original decimal string so large values survive round-trips through
/// JS clients without float truncation; rejects fractional or signed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

#[derive(Debug, thiserror::Error)]
pub enum AmountParseError {
    #[error("amount '{0}' is not a base-10 integer")]
    NotAnInteger(String),
    #[error("amount '{0}' overflows u128")]
    Overflow(String),
}

impl Amount {
    pub fn new(value: u128) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u128 {
        self.0
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::NotAnInteger(s.to_string()));
        }
        let value = s
            .parse::<u128>()
            .map_err(|_| AmountParseError::Overflow(s.to_string()))?;
        Ok(Amount(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_amount_parses_decoration() {
        let a: MoneyAmount = "$10.50".try_into().unwrap();
        assert_eq!(a.scale(), 2);
        assert_eq!(a.mantissa(), 1050);

        let b: MoneyAmount = "1,000".try_into().unwrap();
        assert_eq!(b.scale(), 0);
        assert_eq!(b.mantissa(), 1000);
    }

    #[test]
    fn amount_round_trips_as_string() {
        let a = Amount::from_str("123456789012345678901234567890").unwrap();
        assert_eq!(a.to_string(), "123456789012345678901234567890");
    }

    #[test]
    fn amount_rejects_fractional_and_signed() {
        assert!(Amount::from_str("1.5").is_err());
        assert!(Amount::from_str("-1").is_err());
        assert!(Amount::from_str("").is_err());
    }
}
