use primitive_types::U256;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a token, by its canonical address string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an account (depositor, operator, fee receiver, curator).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw token amount.
///
/// Arithmetic in the pipelines goes through the checked helpers so that
/// would-be negative balances surface as errors instead of wrapping.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub fn new(amount: impl Into<U256>) -> Self {
        Self(amount.into())
    }

    #[must_use]
    pub fn zero() -> Self {
        Self(U256::zero())
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    #[must_use]
    pub fn min(self, other: Self) -> Self {
        if self.0 <= other.0 { self } else { other }
    }

    /// Converts to a `Decimal`. Amounts beyond u128 range are not expected
    /// by this core; `None` is returned rather than truncating.
    #[must_use]
    pub fn to_decimal(&self) -> Option<Decimal> {
        if self.0 > U256::from(u128::MAX) {
            return None;
        }
        Decimal::from_u128(self.0.as_u128())
    }

    /// Rounds a non-negative decimal down to a raw amount.
    #[must_use]
    pub fn from_decimal_floor(value: Decimal) -> Option<Self> {
        if value < Decimal::ZERO {
            return None;
        }
        value.floor().to_u128().map(|v| Self(U256::from(v)))
    }

    /// Rounds a non-negative decimal up to a raw amount.
    #[must_use]
    pub fn from_decimal_ceil(value: Decimal) -> Option<Self> {
        if value < Decimal::ZERO {
            return None;
        }
        value.ceil().to_u128().map(|v| Self(U256::from(v)))
    }
}

impl From<u64> for TokenAmount {
    fn from(v: u64) -> Self {
        Self(U256::from(v))
    }
}

impl From<u128> for TokenAmount {
    fn from(v: u128) -> Self {
        Self(U256::from(v))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
