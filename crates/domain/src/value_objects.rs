//! Value objects shared by carts, orders and payments.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Money amount represented in minor units (cents) to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money {
    /// Amount in cents (e.g., 1000 = 10.00)
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the whole-unit portion.
    pub fn units(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion (remainder after whole units).
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Multiplies by a quantity, failing instead of wrapping.
    pub fn checked_mul(&self, quantity: u32) -> Result<Money, DomainError> {
        self.cents
            .checked_mul(i64::from(quantity))
            .map(Money::from_cents)
            .ok_or(DomainError::AmountOverflow)
    }

    /// Adds two amounts, failing instead of wrapping.
    pub fn checked_add(&self, other: Money) -> Result<Money, DomainError> {
        self.cents
            .checked_add(other.cents)
            .map(Money::from_cents)
            .ok_or(DomainError::AmountOverflow)
    }

    /// Sums amounts, failing on the first overflow.
    pub fn try_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Result<Money, DomainError> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, m| acc.checked_add(m))
    }

    /// Formats the amount as a plain decimal string (`"12.34"`), the shape
    /// payment providers expect.
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.cents < 0 { "-" } else { "" };
        format!("{sign}{}.{:02}", self.units().abs(), self.cents_part())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

/// ISO-4217 currency code, always three upper-case ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parses and normalizes a currency code (`"ugx"` becomes `"UGX"`).
    pub fn parse(code: &str) -> Result<Self, DomainError> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(DomainError::InvalidCurrency(code.to_string()))
        }
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_parts() {
        let money = Money::from_cents(1234);
        assert_eq!(money.cents(), 1234);
        assert_eq!(money.units(), 12);
        assert_eq!(money.cents_part(), 34);
    }

    #[test]
    fn test_money_decimal_string() {
        assert_eq!(Money::from_cents(1234).to_decimal_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_decimal_string(), "0.05");
        assert_eq!(Money::from_cents(100).to_string(), "1.00");
        assert_eq!(Money::from_cents(-250).to_decimal_string(), "-2.50");
    }

    #[test]
    fn test_money_sum_and_multiply() {
        let total =
            Money::try_sum([Money::from_cents(1000).checked_mul(3).unwrap(), Money::from_cents(250)])
                .unwrap();
        assert_eq!(total.cents(), 3250);
    }

    #[test]
    fn test_money_overflow_is_an_error() {
        let huge = Money::from_cents(5_000_000_000_000_000_000);
        assert_eq!(huge.checked_mul(2), Err(DomainError::AmountOverflow));
        assert_eq!(huge.checked_add(huge), Err(DomainError::AmountOverflow));
        assert_eq!(
            Money::try_sum([huge, huge, Money::from_cents(1)]),
            Err(DomainError::AmountOverflow)
        );
    }

    #[test]
    fn test_money_serializes_as_cents() {
        let json = serde_json::to_string(&Money::from_cents(999)).unwrap();
        assert_eq!(json, "999");
    }

    #[test]
    fn test_currency_normalizes_case() {
        assert_eq!(Currency::parse("ugx").unwrap().as_str(), "UGX");
        assert_eq!(Currency::parse(" USD ").unwrap().as_str(), "USD");
    }

    #[test]
    fn test_currency_rejects_bad_codes() {
        assert!(Currency::parse("US").is_err());
        assert!(Currency::parse("US1").is_err());
        assert!(serde_json::from_str::<Currency>("\"EURO\"").is_err());
    }
}
