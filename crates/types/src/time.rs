//! Logical simulation time.

use sbor::prelude::BasicSbor;
use std::fmt;
use std::ops::{Add, Sub};

/// Nanoseconds per second, the resolution of the logical clock.
const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Logical simulation time in nanoseconds.
///
/// Granted times are non-decreasing for the life of a federation.
/// Arithmetic saturates at [`SimTime::MAX_TIME`], which acts as the
/// "never / no constraint" sentinel; it is chosen so that adding delays
/// to it cannot wrap.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor,
)]
pub struct SimTime(i64);

impl SimTime {
    /// Time zero, the point every federate is granted on entering execution.
    pub const ZERO: SimTime = SimTime(0);

    /// Sentinel for "never". Any value at or above this compares as
    /// unconstrained.
    pub const MAX_TIME: SimTime = SimTime(i64::MAX / 2);

    /// Smallest representable increment.
    pub const EPSILON: SimTime = SimTime(1);

    pub const fn from_nanos(nanos: i64) -> Self {
        SimTime(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn from_millis(millis: i64) -> Self {
        SimTime(millis.saturating_mul(1_000_000))
    }

    /// Convert from seconds, the unit user-facing APIs speak.
    pub fn from_seconds(seconds: f64) -> Self {
        if !seconds.is_finite() || seconds >= (Self::MAX_TIME.0 as f64 / NANOS_PER_SECOND as f64) {
            return Self::MAX_TIME;
        }
        SimTime((seconds * NANOS_PER_SECOND as f64) as i64)
    }

    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / NANOS_PER_SECOND as f64
    }

    /// True when this value means "never".
    pub fn is_max(self) -> bool {
        self >= Self::MAX_TIME
    }

    /// Saturating addition; `MAX_TIME` absorbs.
    pub fn saturating_add(self, other: SimTime) -> SimTime {
        if self.is_max() || other.is_max() {
            return Self::MAX_TIME;
        }
        SimTime(self.0.saturating_add(other.0).min(Self::MAX_TIME.0))
    }

    pub fn saturating_sub(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(other.0).max(0))
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        self.saturating_add(rhs)
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            write!(f, "max")
        } else {
            write!(f, "{}s", self.as_seconds())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_roundtrip() {
        let t = SimTime::from_seconds(1.5);
        assert_eq!(t.as_nanos(), 1_500_000_000);
        assert!((t.as_seconds() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_max_time_absorbs_addition() {
        let t = SimTime::MAX_TIME + SimTime::from_seconds(10.0);
        assert!(t.is_max());
        assert_eq!(t, SimTime::MAX_TIME + SimTime::ZERO);
    }

    #[test]
    fn test_infinite_seconds_saturate() {
        assert!(SimTime::from_seconds(f64::INFINITY).is_max());
        assert!(SimTime::from_seconds(1e18).is_max());
    }

    #[test]
    fn test_ordering() {
        assert!(SimTime::ZERO < SimTime::EPSILON);
        assert!(SimTime::from_seconds(2.0) < SimTime::MAX_TIME);
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        let t = SimTime::from_seconds(1.0) - SimTime::from_seconds(5.0);
        assert_eq!(t, SimTime::ZERO);
    }
}
