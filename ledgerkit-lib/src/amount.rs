//! Signed fixed-point amounts.
//!
//! Instrument values never touch floating point. `Amount` wraps
//! `rust_decimal::Decimal`, serializes as a string to preserve precision, and
//! is signed on purpose: an invoice is modelled as a cheque with a negative
//! value, and push notifications carry direction-signed amounts.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ModelError;

/// Signed financial amount with fixed-point precision.
///
/// # Examples
///
/// ```rust
/// use ledgerkit_lib::Amount;
///
/// let price = Amount::from_units(1200);
/// let refund = price.checked_neg().unwrap();
/// assert!(refund.is_negative());
/// assert_eq!(refund.abs(), price);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount {
    // Decimal serializes as a string with the serde feature enabled.
    value: Decimal,
}

impl Amount {
    /// Create from a count of the unit's smallest denomination.
    pub fn from_units(units: i64) -> Self {
        Self {
            value: Decimal::from(units),
        }
    }

    /// Create from a decimal string such as `"123.45"`.
    pub fn from_str_checked(s: &str) -> Result<Self, ModelError> {
        Decimal::from_str(s)
            .map(|value| Self { value })
            .map_err(|e| ModelError::InvalidAmount(e.to_string()))
    }

    /// Value in smallest units, truncated toward zero. Saturates at the i64
    /// boundaries if the decimal is out of range.
    pub fn as_units(&self) -> i64 {
        let truncated = self.value.trunc();
        truncated.to_i64().unwrap_or(if truncated.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
    }

    /// Checked addition.
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        self.value
            .checked_add(other.value)
            .map(|value| Self { value })
    }

    /// Checked subtraction.
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        self.value
            .checked_sub(other.value)
            .map(|value| Self { value })
    }

    /// Checked negation. `None` only at the extreme of the decimal range.
    pub fn checked_neg(&self) -> Option<Self> {
        Decimal::ZERO
            .checked_sub(self.value)
            .map(|value| Self { value })
    }

    /// Magnitude of the amount.
    pub fn abs(&self) -> Self {
        Self {
            value: self.value.abs(),
        }
    }

    /// True for amounts strictly below zero. Zero is not negative.
    pub fn is_negative(&self) -> bool {
        self.value.is_sign_negative() && !self.value.is_zero()
    }

    pub fn zero() -> Self {
        Self {
            value: Decimal::ZERO,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// The internal decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.value
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Amount {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}
