//! Clock abstraction. Every deadline and chess-clock computation reads time through
//! [`TimeReference`], so tests can substitute an advanceable clock.

use std::ops::Add;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A point in time, measured from an arbitrary fixed origin chosen by the clock.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// The origin.
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    /// A timestamp `since_origin` after the origin.
    pub const fn from_duration(since_origin: Duration) -> Self {
        Self(since_origin)
    }

    /// A timestamp `secs` seconds after the origin.
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Time elapsed since the origin.
    pub const fn as_duration(&self) -> Duration {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs))
    }
}

/// A monotonic clock.
pub trait TimeReference: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time measured from the moment the reference was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeReference {
    origin: Instant,
}

impl SystemTimeReference {
    /// Starts a clock at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeReference {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeReference for SystemTimeReference {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_arithmetic() {
        let t = Timestamp::from_secs(10);
        assert_eq!(t + Duration::from_secs(5), Timestamp::from_secs(15));
        assert_eq!(
            t.saturating_duration_since(Timestamp::from_secs(4)),
            Duration::from_secs(6)
        );
        assert_eq!(
            t.saturating_duration_since(Timestamp::from_secs(40)),
            Duration::ZERO
        );
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemTimeReference::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
