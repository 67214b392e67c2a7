//! Rational number type for exact time base arithmetic.
//!
//! All timestamp conversion in the engine goes through [`Rational::rescale_rnd`],
//! which works on `i128` intermediates so long recordings never accumulate
//! floating point drift.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A rational number represented as a numerator and denominator.
///
/// Used for time bases and frame rates.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    /// Numerator
    pub num: i64,
    /// Denominator (must be positive)
    pub den: i64,
}

/// How a rescaled value is rounded when the division is inexact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Round toward zero.
    #[default]
    Zero,
    /// Round away from zero.
    Inf,
    /// Round toward negative infinity.
    Down,
    /// Round toward positive infinity.
    Up,
    /// Round to nearest, halfway cases away from zero.
    NearInf,
}

impl Rounding {
    /// Divide `n` by a strictly positive `d` with this rounding.
    fn divide(self, n: i128, d: i128) -> i128 {
        debug_assert!(d > 0);
        match self {
            Rounding::Zero => n / d,
            Rounding::Inf => {
                if n >= 0 {
                    n.saturating_add(d - 1) / d
                } else {
                    -((-n).saturating_add(d - 1) / d)
                }
            }
            Rounding::Down => n.div_euclid(d),
            Rounding::Up => -((-n).div_euclid(d)),
            Rounding::NearInf => {
                if n >= 0 {
                    n.saturating_add(d / 2) / d
                } else {
                    -((-n).saturating_add(d / 2) / d)
                }
            }
        }
    }
}

/// Rounding plus the sentinel pass-through flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundingMode {
    /// Rounding applied to inexact results.
    pub rounding: Rounding,
    /// Return `i64::MIN` and `i64::MAX` unchanged instead of rescaling them.
    pub pass_minmax: bool,
}

impl RoundingMode {
    /// Nearest rounding that leaves "no timestamp" values alone.
    ///
    /// This is the mode used for every pts/dts conversion in the engine.
    pub const NEAR_INF_PASS_MINMAX: Self = Self {
        rounding: Rounding::NearInf,
        pass_minmax: true,
    };

    /// Truncating mode used for durations.
    pub const TRUNCATE: Self = Self {
        rounding: Rounding::Zero,
        pass_minmax: true,
    };

    /// Create a mode without sentinel pass-through.
    pub const fn new(rounding: Rounding) -> Self {
        Self {
            rounding,
            pass_minmax: false,
        }
    }

    /// Enable sentinel pass-through.
    #[must_use]
    pub const fn pass_minmax(mut self) -> Self {
        self.pass_minmax = true;
        self
    }
}

impl Rational {
    /// Create a new rational number.
    ///
    /// # Panics
    ///
    /// Panics if denominator is zero.
    pub fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "Denominator cannot be zero");
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        Self { num, den }
    }

    /// Create a zero rational.
    pub const fn zero() -> Self {
        Self { num: 0, den: 1 }
    }

    /// Check if this rational is zero.
    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    /// Check whether this rational can serve as a time base.
    pub fn is_valid_time_base(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Reduce the rational to its simplest form.
    pub fn reduce(&self) -> Self {
        if self.num == 0 {
            return Self { num: 0, den: 1 };
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        Self {
            num: self.num / g as i64,
            den: self.den / g as i64,
        }
    }

    /// Convert to f64.
    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Get the reciprocal of this rational.
    ///
    /// # Panics
    ///
    /// Panics if the numerator is zero.
    pub fn recip(&self) -> Self {
        assert!(self.num != 0, "Cannot take reciprocal of zero");
        Self::new(self.den, self.num)
    }

    /// Rescale a duration from this time base to another, truncating.
    ///
    /// "No timestamp" values pass through unchanged.
    pub fn rescale(&self, value: i64, target: Rational) -> i64 {
        self.rescale_rnd(value, target, RoundingMode::TRUNCATE)
    }

    /// Rescale `value` from this time base to `target`.
    ///
    /// Computes `value * self.num * target.den / (self.den * target.num)`
    /// exactly and rounds once. Results that do not fit in `i64`, and a zero
    /// target numerator, yield `i64::MIN`.
    pub fn rescale_rnd(&self, value: i64, target: Rational, mode: RoundingMode) -> i64 {
        if mode.pass_minmax && (value == i64::MIN || value == i64::MAX) {
            return value;
        }

        let num = (value as i128)
            .checked_mul(self.num as i128)
            .and_then(|v| v.checked_mul(target.den as i128));
        let den = (self.den as i128).checked_mul(target.num as i128);

        let (Some(num), Some(den)) = (num, den) else {
            return i64::MIN;
        };
        if den == 0 {
            return i64::MIN;
        }
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };

        i64::try_from(mode.rounding.divide(num, den)).unwrap_or(i64::MIN)
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rational({}/{})", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as i128 * other.den as i128;
        let rhs = other.num as i128 * self.den as i128;
        lhs.cmp(&rhs)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self::new(num as i64, den as i64)
    }
}

impl From<(i64, i64)> for Rational {
    fn from((num, den): (i64, i64)) -> Self {
        Self::new(num, den)
    }
}

/// Calculate the greatest common divisor using Euclidean algorithm.
fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}
