//! Classification of the escape-hatch limits configured on a timer.

use std::time::Duration;

use serde::Serialize;

/// Which limits can force an execution regardless of the debounce delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeferLimit {
    /// Execution can be deferred indefinitely by continuous triggering.
    NoLimit,
    /// Execution is forced after a fixed number of coalesced triggers.
    Count,
    /// Execution is forced once a fixed span has elapsed since the first trigger.
    Span,
    /// Both limits apply, whichever is reached first.
    SpanAndCount,
}

impl DeferLimit {
    #[must_use]
    pub const fn from_limits(span: Option<Duration>, count: Option<u32>) -> Self {
        match (span.is_some(), count.is_some()) {
            (false, false) => Self::NoLimit,
            (false, true) => Self::Count,
            (true, false) => Self::Span,
            (true, true) => Self::SpanAndCount,
        }
    }

    #[must_use]
    pub const fn has_span(self) -> bool { matches!(self, Self::Span | Self::SpanAndCount) }

    #[must_use]
    pub const fn has_count(self) -> bool { matches!(self, Self::Count | Self::SpanAndCount) }
}

/// The limits a schedule enforces on every trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Limits {
    pub(crate) span: Option<Duration>,
    pub(crate) count: Option<u32>,
}

impl Limits {
    pub(crate) const fn kind(self) -> DeferLimit { DeferLimit::from_limits(self.span, self.count) }
}
