//! Fixed-point monetary values
//!
//! All arithmetic is exact within `Decimal`'s precision; rounding happens
//! only at boundaries: display, cross-currency conversion output, and the
//! final amounts the engine persists. Rounding is banker's (midpoint to
//! even) to 2 fractional digits.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// Fractional digits kept for persisted and displayed values
pub const MONEY_SCALE: u32 = 2;

/// A monetary amount
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct MoneyValue(Decimal);

impl MoneyValue {
    /// Zero amount
    pub const ZERO: MoneyValue = MoneyValue(Decimal::ZERO);

    /// Wrap a raw decimal
    pub fn new(value: Decimal) -> Self {
        MoneyValue(value)
    }

    /// Parse a decimal literal of the form `-?[0-9]+(\.[0-9]+)?`.
    ///
    /// Any other form (empty string, leading `+`, bare `.`, exponent
    /// notation, multiple points) is rejected.
    pub fn parse(input: &str) -> Option<Self> {
        let unsigned = input.strip_prefix('-').unwrap_or(input);
        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((int_part, frac_part)) => (int_part, Some(frac_part)),
            None => (unsigned, None),
        };
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if let Some(frac) = frac_part {
            if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
        }
        input.parse::<Decimal>().ok().map(MoneyValue)
    }

    /// The underlying decimal
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Strictly less than zero
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Exactly zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Banker's rounding to [`MONEY_SCALE`] fractional digits
    pub fn rounded(&self) -> MoneyValue {
        MoneyValue(
            self.0
                .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven),
        )
    }

    /// Decimal literal with exactly two fractional digits, banker-rounded.
    /// This is the wire output format for all monetary values.
    pub fn to_fixed_string(&self) -> String {
        format!("{:.2}", self.rounded().0)
    }
}

impl fmt::Display for MoneyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_fixed_string())
    }
}

impl Add for MoneyValue {
    type Output = MoneyValue;

    fn add(self, rhs: MoneyValue) -> MoneyValue {
        MoneyValue(self.0 + rhs.0)
    }
}

impl Sub for MoneyValue {
    type Output = MoneyValue;

    fn sub(self, rhs: MoneyValue) -> MoneyValue {
        MoneyValue(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for MoneyValue {
    type Output = MoneyValue;

    fn mul(self, rate: Decimal) -> MoneyValue {
        MoneyValue(self.0 * rate)
    }
}

impl Div<Decimal> for MoneyValue {
    type Output = MoneyValue;

    fn div(self, rate: Decimal) -> MoneyValue {
        MoneyValue(self.0 / rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_decimal_literals() {
        assert_eq!(MoneyValue::parse("0"), Some(MoneyValue(Decimal::ZERO)));
        assert_eq!(
            MoneyValue::parse("20.00"),
            Some(MoneyValue(Decimal::new(2000, 2)))
        );
        assert_eq!(
            MoneyValue::parse("-1.50"),
            Some(MoneyValue(Decimal::new(-150, 2)))
        );
        assert_eq!(
            MoneyValue::parse("40"),
            Some(MoneyValue(Decimal::new(40, 0)))
        );
    }

    #[test]
    fn test_parse_rejects_other_forms() {
        for input in ["", "-", "+1", "1.", ".5", "20.0.0", "1e3", "1,5", "abc", "--1", "1 "] {
            assert!(MoneyValue::parse(input).is_none(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_bankers_rounding() {
        let cases = [
            ("2.005", "2.00"),
            ("2.015", "2.02"),
            ("2.025", "2.02"),
            ("2.035", "2.04"),
            ("-2.005", "-2.00"),
            ("2.004", "2.00"),
            ("2.006", "2.01"),
        ];
        for (input, want) in cases {
            let value = MoneyValue::parse(input).unwrap();
            assert_eq!(value.to_fixed_string(), want, "rounding {input}");
        }
    }

    #[test]
    fn test_fixed_string_pads_to_two_digits() {
        assert_eq!(MoneyValue::parse("40").unwrap().to_fixed_string(), "40.00");
        assert_eq!(MoneyValue::parse("40.1").unwrap().to_fixed_string(), "40.10");
        assert_eq!(MoneyValue::ZERO.to_fixed_string(), "0.00");
    }

    #[test]
    fn test_arithmetic_is_exact() {
        let a = MoneyValue::parse("0.1").unwrap();
        let b = MoneyValue::parse("0.2").unwrap();
        assert_eq!(a + b, MoneyValue::parse("0.3").unwrap());
        assert_eq!(b - a, MoneyValue::parse("0.1").unwrap());

        let v = MoneyValue::parse("50").unwrap() * Decimal::new(106, 2);
        assert_eq!(v, MoneyValue::parse("53").unwrap());
    }

    #[test]
    fn test_sign_predicates() {
        assert!(MoneyValue::parse("0.01").unwrap().is_positive());
        assert!(MoneyValue::parse("-0.01").unwrap().is_negative());
        assert!(MoneyValue::parse("0.00").unwrap().is_zero());
        assert!(!MoneyValue::parse("0.00").unwrap().is_positive());
    }
}
