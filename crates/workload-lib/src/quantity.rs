//! Resource quantity parsing and exact arithmetic
//!
//! Quantities follow the Kubernetes grammar: a signed decimal number followed
//! by an optional suffix. Supported suffixes are binary (`Ki`, `Mi`, `Gi`,
//! `Ti`, `Pi`, `Ei`), decimal SI (`n`, `u`, `m`, `k`, `M`, `G`, `T`, `P`, `E`)
//! and decimal exponents (`1e3`, `5E-2`).
//!
//! Values are held as an integer count of nano-units so that sums and
//! comparisons are exact. Fractions below one nano-unit round up.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use thiserror::Error;

const NANOS_EXPONENT: i32 = 9;

/// Errors produced while parsing a quantity string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("quantity '{0}' has no numeric part")]
    MissingNumber(String),

    #[error("quantity '{0}' has an unknown suffix")]
    UnknownSuffix(String),

    #[error("quantity '{0}' is too large")]
    Overflow(String),
}

/// A parsed quantity, stored in nano-units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ParsedQuantity {
    nanos: i128,
}

impl ParsedQuantity {
    pub const ZERO: ParsedQuantity = ParsedQuantity { nanos: 0 };

    /// Parse a quantity string such as `"200m"` or `"5Gi"`
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, unsigned) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let number_end = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_end);

        let (int_part, frac_part) = match number.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(QuantityError::MissingNumber(input.to_string()));
        }
        if frac_part.contains('.') {
            return Err(QuantityError::MissingNumber(input.to_string()));
        }

        let overflow = || QuantityError::Overflow(input.to_string());

        let mut mantissa: i128 = 0;
        for digit in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit - b'0')))
                .ok_or_else(overflow)?;
        }

        let (decimal_exponent, binary_power) = parse_suffix(suffix)
            .ok_or_else(|| QuantityError::UnknownSuffix(input.to_string()))?;

        let mut numerator = mantissa;
        for _ in 0..binary_power {
            numerator = numerator.checked_mul(1024).ok_or_else(overflow)?;
        }

        let power = i32::try_from(frac_part.len())
            .ok()
            .and_then(|frac_digits| {
                decimal_exponent
                    .checked_add(NANOS_EXPONENT)?
                    .checked_sub(frac_digits)
            })
            .ok_or_else(overflow)?;
        let nanos = if power >= 0 {
            let scale = pow10(power.unsigned_abs()).ok_or_else(overflow)?;
            numerator.checked_mul(scale).ok_or_else(overflow)?
        } else {
            match pow10(power.unsigned_abs()) {
                Some(scale) => ceil_div(numerator, scale),
                // Anything this small is below one nano-unit
                None if numerator == 0 => 0,
                None => 1,
            }
        };

        Ok(Self {
            nanos: if negative { -nanos } else { nanos },
        })
    }

    /// Parse the string held by a k8s-openapi `Quantity`
    pub fn from_k8s(quantity: &Quantity) -> Result<Self, QuantityError> {
        Self::parse(&quantity.0)
    }

    /// Returns true if the quantity is strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.nanos > 0
    }

    /// Value in nano-units
    pub fn nanos(&self) -> i128 {
        self.nanos
    }

    /// Value in milli-units, rounded up (CPU millicores)
    pub fn millis(&self) -> i128 {
        ceil_div(self.nanos, 1_000_000)
    }

    /// Value in whole units, rounded up (bytes for memory)
    pub fn units(&self) -> i128 {
        ceil_div(self.nanos, 1_000_000_000)
    }
}

impl FromStr for ParsedQuantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Add for ParsedQuantity {
    type Output = ParsedQuantity;

    fn add(self, rhs: Self) -> Self::Output {
        ParsedQuantity {
            nanos: self.nanos.saturating_add(rhs.nanos),
        }
    }
}

impl PartialOrd for ParsedQuantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParsedQuantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl fmt::Display for ParsedQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos % 1_000_000_000 == 0 {
            write!(f, "{}", self.nanos / 1_000_000_000)
        } else if self.nanos % 1_000_000 == 0 {
            write!(f, "{}m", self.nanos / 1_000_000)
        } else {
            write!(f, "{}n", self.nanos)
        }
    }
}

/// Returns (decimal exponent, power of 1024) for a suffix
fn parse_suffix(suffix: &str) -> Option<(i32, u32)> {
    let parsed = match suffix {
        "" => (0, 0),
        "n" => (-9, 0),
        "u" => (-6, 0),
        "m" => (-3, 0),
        "k" => (3, 0),
        "M" => (6, 0),
        "G" => (9, 0),
        "T" => (12, 0),
        "P" => (15, 0),
        "E" => (18, 0),
        "Ki" => (0, 1),
        "Mi" => (0, 2),
        "Gi" => (0, 3),
        "Ti" => (0, 4),
        "Pi" => (0, 5),
        "Ei" => (0, 6),
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            let digits = exponent
                .strip_prefix('-')
                .or_else(|| exponent.strip_prefix('+'))
                .unwrap_or(exponent);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (exponent.parse::<i32>().ok()?, 0)
        }
    };
    Some(parsed)
}

fn pow10(exponent: u32) -> Option<i128> {
    10i128.checked_pow(exponent)
}

fn ceil_div(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    if numerator % denominator > 0 {
        quotient + 1
    } else {
        quotient
    }
}
