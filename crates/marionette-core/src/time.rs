//! Time primitives for Marionette
//!
//! Snapshots carry the authoring peer's motion time. Receivers keep their own
//! local time for arrival bookkeeping and never mix the two timelines except
//! through the delay estimator.

use std::ops::{Add, Sub};
use std::time::Duration;

/// Motion time - microseconds on a peer's local timeline
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MotionTime(pub i64);

impl MotionTime {
    pub const ZERO: MotionTime = MotionTime(0);
    pub const MAX: MotionTime = MotionTime(i64::MAX);

    #[inline]
    pub fn from_micros(micros: i64) -> Self {
        MotionTime(micros)
    }

    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        MotionTime(millis * 1000)
    }

    /// Rounds to the nearest microsecond so wire seconds map back exactly.
    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        MotionTime((secs * 1_000_000.0).round() as i64)
    }

    #[inline]
    pub fn as_micros(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn as_millis(self) -> i64 {
        self.0 / 1000
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Signed distance in seconds from `earlier` to `self`
    #[inline]
    pub fn secs_since(self, earlier: MotionTime) -> f64 {
        self.0.saturating_sub(earlier.0) as f64 / 1_000_000.0
    }

    /// Advance by a fractional number of seconds (negative values are ignored)
    #[inline]
    pub fn advance_secs(self, secs: f64) -> Self {
        if secs <= 0.0 {
            return self;
        }
        MotionTime(self.0.saturating_add((secs * 1_000_000.0).round() as i64))
    }

    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        MotionTime(self.0.saturating_add(duration_micros(duration)))
    }

    #[inline]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        MotionTime(self.0.saturating_sub(duration_micros(duration)))
    }
}

#[inline]
fn duration_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

impl Add<Duration> for MotionTime {
    type Output = MotionTime;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub<Duration> for MotionTime {
    type Output = MotionTime;

    #[inline]
    fn sub(self, rhs: Duration) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

/// Elapsed time between two instants, zero if `rhs` is later
impl Sub<MotionTime> for MotionTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: MotionTime) -> Self::Output {
        let diff = self.0.saturating_sub(rhs.0);
        if diff >= 0 {
            Duration::from_micros(diff as u64)
        } else {
            Duration::ZERO
        }
    }
}

impl std::fmt::Debug for MotionTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t({:.3}ms)", self.0 as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_secs_roundtrip_is_exact() {
        for micros in [0i64, 1, 199_999, 200_000, 300_000, 1_234_567_891] {
            let t = MotionTime::from_micros(micros);
            assert_eq!(MotionTime::from_secs_f64(t.as_secs_f64()), t);
        }
    }

    #[test]
    fn test_sub_saturates_at_zero() {
        let early = MotionTime::from_millis(100);
        let late = MotionTime::from_millis(150);

        assert_eq!(late - early, Duration::from_millis(50));
        assert_eq!(early - late, Duration::ZERO);
        assert!((early.secs_since(late) + 0.05).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_wire_seconds_roundtrip(micros in -10_000_000_000i64..10_000_000_000i64) {
            let t = MotionTime::from_micros(micros);
            prop_assert_eq!(MotionTime::from_secs_f64(t.as_secs_f64()), t);
        }
    }

    #[test]
    fn test_arithmetic_saturates_at_extremes() {
        let low = MotionTime::from_secs_f64(-1e300);
        let high = MotionTime::from_secs_f64(1e300);
        assert_eq!(low, MotionTime(i64::MIN));
        assert_eq!(high, MotionTime::MAX);

        assert_eq!(high - low, Duration::from_micros(i64::MAX as u64));
        assert_eq!(low - high, Duration::ZERO);
        assert!(high.secs_since(low) > 0.0);
        assert!(low.secs_since(high) < 0.0);
        assert_eq!(high + Duration::MAX, MotionTime::MAX);
        assert_eq!(low - Duration::from_secs(1), MotionTime(i64::MIN));
    }

    #[test]
    fn test_advance_secs_ignores_negative() {
        let t = MotionTime::from_millis(10);
        assert_eq!(t.advance_secs(-1.0), t);
        assert_eq!(t.advance_secs(0.5), MotionTime::from_millis(510));
    }
}
