//! Value Objects for the storefront

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

/// Identity of a signed-in customer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self { Self::new(value) }
}

/// Money value object, held in minor units (cents).
///
/// Arithmetic is exact and saturates at the `i64` bounds rather than
/// overflowing; conversion to a decimal only happens when the value crosses a
/// serialization or display boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self { Self(minor) }
    pub const fn from_major(major: i64) -> Self { Self(major * 100) }
    pub const fn minor(self) -> i64 { self.0 }

    pub fn to_decimal(self) -> Decimal { Decimal::new(self.0, 2) }

    /// Rounds half away from zero to the cent.
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        let cents = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero) * Decimal::ONE_HUNDRED;
        cents.to_i64().map(Self).ok_or(MoneyError::OutOfRange)
    }

    pub fn multiply(self, qty: u32) -> Money { Money(self.0.saturating_mul(i64::from(qty))) }

    /// Applies a rate expressed in basis points, rounding half up to the cent.
    pub fn apply_rate(self, rate: TaxRate) -> Money {
        let scaled = i128::from(self.0) * i128::from(rate.basis_points());
        let rounded = if scaled >= 0 { (scaled + 5_000) / 10_000 } else { (scaled - 5_000) / 10_000 };
        Money(i64::try_from(rounded).unwrap_or(if rounded > 0 { i64::MAX } else { i64::MIN }))
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money { Money(self.0.saturating_add(rhs.0)) }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money { iter.fold(Money::ZERO, Add::add) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.to_decimal()) }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self { value.to_decimal() }
}

impl TryFrom<Decimal> for Money {
    type Error = MoneyError;
    fn try_from(value: Decimal) -> Result<Self, Self::Error> { Money::from_decimal(value) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("amount out of range")]
    OutOfRange,
}

/// Tax rate in basis points (800 = 8%).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl TaxRate {
    pub const fn from_basis_points(bps: u32) -> Self { Self(bps) }
    pub const fn basis_points(self) -> u32 { self.0 }
}

impl Default for TaxRate {
    fn default() -> Self { Self(800) }
}
