//! Monotonic deadlines with a "never" sentinel.

use std::time::{Duration, Instant};

/// A point on the monotonic clock at which the worker should evaluate the
/// schedule, or [`Deadline::Never`] when nothing is scheduled.
///
/// Variant order matters: every `At` sorts before `Never`, so `min` picks the
/// sooner of two deadlines and `Never` behaves like +infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Deadline {
    /// Scheduled for the given instant.
    At(Instant),
    /// Nothing scheduled.
    Never,
}

impl Deadline {
    /// Returns `now + offset`, or `Never` if the addition overflows the clock.
    #[must_use]
    pub fn after(now: Instant, offset: Duration) -> Self {
        now.checked_add(offset).map_or(Self::Never, Self::At)
    }

    /// Whether the deadline has been reached at `now`.
    #[must_use]
    pub fn is_due(self, now: Instant) -> bool {
        match self {
            Self::At(at) => now >= at,
            Self::Never => false,
        }
    }

    #[cfg(test)]
    pub const fn is_never(self) -> bool { matches!(self, Self::Never) }

    /// Time left until the deadline, zero if it already passed, `None` for `Never`.
    #[must_use]
    pub fn remaining(self, now: Instant) -> Option<Duration> {
        match self {
            Self::At(at) => Some(at.saturating_duration_since(now)),
            Self::Never => None,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self { Self::Never }
}
