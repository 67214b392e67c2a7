//! Time bases and the "no timestamp" sentinel.

use crate::rational::{Rational, RoundingMode};
use std::fmt;

/// Raw timestamp value meaning "unknown".
///
/// Packets carry raw `i64` pts/dts; any of them may be `NOPTS`.
pub const NOPTS: i64 = i64::MIN;

/// Check whether a raw timestamp is defined.
#[inline]
pub fn is_valid(ts: i64) -> bool {
    ts != NOPTS
}

/// A time base for converting between timestamp units.
///
/// Common time bases:
/// - 1/90000 for MPEG video
/// - 1/48000 for 48kHz audio
/// - 1/1000 for milliseconds (live frame sources)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBase(pub Rational);

impl TimeBase {
    /// Create a new time base from numerator and denominator.
    pub fn new(num: i64, den: i64) -> Self {
        Self(Rational::new(num, den))
    }

    /// Standard MPEG time base (1/90000).
    pub const MPEG: Self = Self(Rational { num: 1, den: 90000 });

    /// Millisecond time base (1/1000).
    pub const MILLISECONDS: Self = Self(Rational { num: 1, den: 1000 });

    /// Microsecond time base (1/1000000).
    pub const MICROSECONDS: Self = Self(Rational { num: 1, den: 1_000_000 });

    /// Convert a timestamp to another time base, rounding to nearest.
    ///
    /// `NOPTS` is returned unchanged.
    pub fn convert(&self, value: i64, target: TimeBase) -> i64 {
        self.0
            .rescale_rnd(value, target.0, RoundingMode::NEAR_INF_PASS_MINMAX)
    }

    /// Convert a duration to another time base, truncating.
    pub fn convert_duration(&self, value: i64, target: TimeBase) -> i64 {
        self.0.rescale(value, target.0)
    }

    /// Convert a timestamp to milliseconds, or `None` when it is unknown.
    pub fn to_millis(&self, value: i64) -> Option<i64> {
        if !is_valid(value) {
            return None;
        }
        let ms = self.convert(value, TimeBase::MILLISECONDS);
        is_valid(ms).then_some(ms)
    }

    /// Convert to seconds as f64.
    pub fn to_seconds(&self, value: i64) -> f64 {
        value as f64 * self.0.to_f64()
    }

    /// Get the time base as a rational.
    pub fn as_rational(&self) -> Rational {
        self.0
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::MPEG
    }
}

impl From<Rational> for TimeBase {
    fn from(r: Rational) -> Self {
        Self(r)
    }
}

impl From<TimeBase> for Rational {
    fn from(tb: TimeBase) -> Self {
        tb.0
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.num, self.0.den)
    }
}
