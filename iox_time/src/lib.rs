//! Time handling, factored out of the rest of the worker core so that scheduling and
//! persistence code can be driven by a fake clock in tests.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    fmt::Debug,
    sync::Arc,
    time::{Duration, SystemTime},
};

/// A point in time, represented as a UTC timestamp.
///
/// Arithmetic on [`Time`] saturates rather than panics or wraps, matching the way duration
/// bookkeeping (task age, replica verify time) is used throughout the scheduler and the
/// replica store: an overflowed timestamp should clamp, not corrupt a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// The Unix epoch.
    pub const MIN: Self = Self(DateTime::<Utc>::MIN_UTC);

    /// Constructs a [`Time`] from a UTC [`DateTime`].
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Constructs a [`Time`] from whole seconds since the Unix epoch.
    pub fn from_timestamp(secs: i64) -> Self {
        Self(
            DateTime::from_timestamp(secs, 0)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        )
    }

    /// The underlying [`DateTime`].
    pub fn date_time(&self) -> DateTime<Utc> {
        self.0
    }

    /// Seconds since the Unix epoch. Used for the `toTimeStamp`/`fromTimeStamp` history-query
    /// parameters in the replica/job persistence layer.
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }

    /// Duration elapsed since an earlier point in time, saturating to zero if `earlier` is
    /// actually later.
    pub fn checked_duration_since(&self, earlier: Self) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or(Duration::ZERO)
    }
}

impl std::ops::Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        // chrono::Duration can't represent every std::time::Duration (its range is narrower);
        // clamp to an effectively-unbounded span rather than panicking.
        let clamped = chrono::Duration::from_std(rhs)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 1000));
        Self(self.0 + clamped)
    }
}

impl From<SystemTime> for Time {
    fn from(t: SystemTime) -> Self {
        Self(t.into())
    }
}

/// Provides [`Time`] values, abstracting the system clock so that it can be swapped for a
/// [`MockProvider`] in tests. Mirrors how the scheduler's boot-policy baseline and the replica
/// store's `verify_time`/timing-triplet columns are stamped.
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] that returns the current system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProvider {}

impl SystemProvider {
    /// Create a new, shareable instance.
    pub fn new_arc() -> Arc<dyn TimeProvider> {
        Arc::new(Self::default())
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time::from(SystemTime::now())
    }
}

/// A [`TimeProvider`] that returns a fixed, externally-advanced time. Used by scheduler and
/// persistence tests that need deterministic timing (e.g. a booted-query scenario that depends
/// on comparing a 1ms baseline against a 1s outlier).
#[derive(Debug)]
pub struct MockProvider {
    now: Mutex<Time>,
}

impl MockProvider {
    /// Create a new mock provider fixed at `start`.
    pub fn new(start: Time) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the mock clock by `duration`.
    pub fn inc(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now = *now + duration;
    }

    /// Set the mock clock to an absolute value.
    pub fn set(&self, time: Time) {
        *self.now.lock() = time;
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_advances_monotonically_on_inc() {
        let provider = MockProvider::new(Time::from_timestamp(1_000));
        assert_eq!(provider.now().timestamp(), 1_000);
        provider.inc(Duration::from_secs(5));
        assert_eq!(provider.now().timestamp(), 1_005);
    }

    #[test]
    fn checked_duration_since_saturates_instead_of_panicking() {
        let earlier = Time::from_timestamp(100);
        let later = Time::from_timestamp(50);
        assert_eq!(earlier.checked_duration_since(later), Duration::ZERO);
    }
}
