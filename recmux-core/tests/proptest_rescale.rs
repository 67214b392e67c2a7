//! Property-based tests for timestamp rescaling.
//!
//! Uses proptest to check that conversions between time bases are stable
//! and that the "no timestamp" sentinel is never rescaled.

use proptest::prelude::*;
use recmux_core::{Rational, Rounding, RoundingMode, TimeBase, NOPTS};

fn rounding() -> impl Strategy<Value = Rounding> {
    prop_oneof![
        Just(Rounding::Zero),
        Just(Rounding::Inf),
        Just(Rounding::Down),
        Just(Rounding::Up),
        Just(Rounding::NearInf),
    ]
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

proptest! {
    /// Going to a finer time base and back lands within one tick.
    #[test]
    fn roundtrip_through_finer_base(
        value in -1_000_000_000_000i64..1_000_000_000_000,
        coarse in 1i64..=48_000,
        factor in 1i64..=20,
    ) {
        let from = Rational::new(1, coarse);
        let to = Rational::new(1, coarse * factor);
        let mode = RoundingMode::NEAR_INF_PASS_MINMAX;

        let there = from.rescale_rnd(value, to, mode);
        let back = to.rescale_rnd(there, from, mode);

        prop_assert!((back - value).abs() <= 1);
    }

    /// Common live time bases round-trip through the MPEG clock.
    #[test]
    fn roundtrip_millis_through_mpeg(value in -10_000_000_000i64..10_000_000_000) {
        let mpeg = TimeBase::MILLISECONDS.convert(value, TimeBase::MPEG);
        prop_assert_eq!(TimeBase::MPEG.convert(mpeg, TimeBase::MILLISECONDS), value);
    }
}

// =============================================================================
// Sentinel Tests
// =============================================================================

proptest! {
    /// NOPTS is a fixed point of every pass-through conversion.
    #[test]
    fn nopts_is_fixed_point(
        from_den in 1i64..=1_000_000,
        to_den in 1i64..=1_000_000,
        mode in rounding(),
    ) {
        let from = Rational::new(1, from_den);
        let to = Rational::new(1, to_den);
        prop_assert_eq!(from.rescale_rnd(NOPTS, to, RoundingMode::new(mode).pass_minmax()), NOPTS);
        prop_assert_eq!(from.rescale(NOPTS, to), NOPTS);
    }
}

// =============================================================================
// Ordering Tests
// =============================================================================

proptest! {
    /// Rescaling never reorders timestamps.
    #[test]
    fn rescale_is_monotonic(
        a in -1_000_000_000i64..1_000_000_000,
        b in -1_000_000_000i64..1_000_000_000,
        from_den in 1i64..=90_000,
        to_den in 1i64..=90_000,
        mode in rounding(),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let from = Rational::new(1, from_den);
        let to = Rational::new(1, to_den);
        let mode = RoundingMode::new(mode);
        prop_assert!(from.rescale_rnd(lo, to, mode) <= from.rescale_rnd(hi, to, mode));
    }

    /// Nearest rounding is symmetric around zero.
    #[test]
    fn near_inf_is_symmetric(
        value in 0i64..1_000_000_000,
        from_den in 1i64..=90_000,
        to_den in 1i64..=90_000,
    ) {
        let from = Rational::new(1, from_den);
        let to = Rational::new(1, to_den);
        let mode = RoundingMode::NEAR_INF_PASS_MINMAX;
        prop_assert_eq!(
            from.rescale_rnd(-value, to, mode),
            -from.rescale_rnd(value, to, mode)
        );
    }
}
