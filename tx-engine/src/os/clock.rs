// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Absolute-time clock wrapper and bounded sleep (component A).
//!
//! [`Timespec`] is deliberately kept as an explicit `(seconds,
//! nanoseconds)` pair rather than collapsed into [`std::time::Instant`]
//! so that the add/sub/compare arithmetic required by the engine's
//! deadline computations (retry-loop timeouts, condvar waits) stays a
//! plain, independently testable value type.

use std::cmp::Ordering;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const MAX_NSEC: u32 = 999_999_999;

/// A `(seconds, nanoseconds)` timestamp on a monotonic, condvar-compatible
/// clock. `nanos` is always held in `[0, 999_999_999]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timespec {
    secs: u64,
    nanos: u32,
}

impl Timespec {
    pub fn new(secs: u64, nanos: u32) -> Self {
        assert!(nanos <= MAX_NSEC, "nanosecond field out of range");
        Self { secs, nanos }
    }

    /// Current wall-clock time. Used only to seed deadlines; the actual
    /// waiting happens against [`Instant`]-based durations, which is
    /// what `std::sync::Condvar` accepts.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::new(since_epoch.as_secs(), since_epoch.subsec_nanos())
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    /// `self + rhs`, with nanosecond carry clamped into `[0, 999_999_999]`.
    pub fn add(&self, rhs: &Timespec) -> Timespec {
        let mut secs = self.secs + rhs.secs;
        let mut nanos = self.nanos + rhs.nanos;
        if nanos > MAX_NSEC {
            nanos -= MAX_NSEC + 1;
            secs += 1;
        }
        Timespec { secs, nanos }
    }

    /// `self - rhs`, with nanosecond borrow. Saturates at zero rather
    /// than going negative (the original wraps on an unsigned
    /// `time_t`; there is no well-defined "negative timestamp" here).
    pub fn sub(&self, rhs: &Timespec) -> Timespec {
        let (mut secs, borrow) = if rhs.nanos > self.nanos { (1u64, true) } else { (0, false) };
        secs = self.secs.saturating_sub(rhs.secs).saturating_sub(secs);
        let nanos = if borrow {
            self.nanos + MAX_NSEC + 1 - rhs.nanos
        } else {
            self.nanos - rhs.nanos
        };
        Timespec { secs, nanos }
    }

    /// Lexicographic comparison: seconds first, then nanoseconds.
    /// Returns `-1`, `0` or `1`, matching the original's
    /// `picotm_os_timespec_compare` contract (property 5 in the
    /// testable-properties list: `compare(a, b) == -compare(b, a)`).
    pub fn compare(&self, other: &Timespec) -> i32 {
        match self.cmp(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::new(self.secs, self.nanos)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self::new(duration.as_secs(), duration.subsec_nanos())
    }
}

impl PartialOrd for Timespec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timespec {
    fn cmp(&self, other: &Self) -> Ordering {
        self.secs.cmp(&other.secs).then(self.nanos.cmp(&other.nanos))
    }
}

/// A monotonic reference point an absolute deadline is computed from.
/// `std::sync::Condvar::wait_timeout` only understands relative
/// durations, so deadlines are carried as [`Instant`] internally and
/// [`Timespec`] stays a pure value type for arithmetic and comparison.
pub fn deadline_after(duration: Duration) -> Instant {
    Instant::now() + duration
}

/// Bounded sleep, restartable across spurious early wakeups the way
/// the original restarts `nanosleep` across `EINTR`. `std::thread::sleep`
/// does not report early wakeup, so this loops on a wall-clock deadline
/// to guarantee at least `duration` has elapsed, which is the contract
/// callers actually rely on.
pub fn sleep(duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_carries_into_seconds() {
        let a = Timespec::new(1, 600_000_000);
        let b = Timespec::new(0, 500_000_000);
        let sum = a.add(&b);
        assert_eq!(sum.secs(), 2);
        assert_eq!(sum.nanos(), 100_000_000);
    }

    #[test]
    fn sub_borrows_from_seconds() {
        let a = Timespec::new(2, 100_000_000);
        let b = Timespec::new(0, 500_000_000);
        let diff = a.sub(&b);
        assert_eq!(diff.secs(), 1);
        assert_eq!(diff.nanos(), 600_000_000);
    }

    #[test]
    fn compare_is_antisymmetric() {
        let a = Timespec::new(1, 0);
        let b = Timespec::new(1, 1);
        assert_eq!(a.compare(&b), -1);
        assert_eq!(b.compare(&a), 1);
        assert_eq!(a.compare(&a), 0);
        assert_eq!(a.compare(&b), -b.compare(&a));
    }

    #[test]
    fn sleep_waits_at_least_the_requested_duration() {
        let start = Instant::now();
        sleep(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
