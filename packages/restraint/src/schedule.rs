//! Schedule state shared between producers and the worker.
//!
//! Everything in here runs under the schedule lock. No clocks or threads:
//! callers pass `now` in.

use std::time::{Duration, Instant};

use crate::deadline::Deadline;
use crate::limit::Limits;

/// Floor applied to every requested delay.
pub const ABSOLUTE_MINIMUM_DELAY: Duration = Duration::from_millis(5);

/// Shortest sleep the worker takes between evaluations.
const MINIMUM_SLEEP: Duration = Duration::from_millis(1);

/// Longest single sleep, matching the largest millisecond wait most hosts accept.
const MAXIMUM_SLEEP: Duration = Duration::from_millis(i32::MAX as u64);

/// Outcome of evaluating the schedule on a worker wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Evaluation {
    /// The deadline has not been reached; nothing changed.
    NotDue,
    /// The deadline passed: pending state was cleared and the action must run.
    Execute,
    /// A cancellation was acknowledged: pending state was cleared without running.
    Discarded,
    /// The deadline passed while paused; the schedule is kept for later.
    Suppressed,
}

#[derive(Debug, Default)]
pub(crate) struct Schedule {
    next_execution: Deadline,
    execution_ceiling: Deadline,
    pending_triggers: u32,
    canceled: bool,
    paused: bool,
    destroyed: bool,
}

impl Schedule {
    /// Debounced (re)schedule.
    ///
    /// Pushes the deadline to `now + interval`, unless the trigger-count limit
    /// has been reached (fire now) or the span ceiling is sooner.
    pub(crate) fn trigger(&mut self, now: Instant, interval: Duration, limits: Limits) {
        let interval = interval.max(ABSOLUTE_MINIMUM_DELAY);

        self.canceled = false;
        self.pending_triggers = self.pending_triggers.saturating_add(1);

        let mut candidate = Deadline::after(now, interval);

        if limits.count.is_some_and(|limit| self.pending_triggers >= limit) {
            candidate = Deadline::At(now);
        }

        if let Some(span) = limits.span {
            // The ceiling only tightens within one debounce window.
            self.execution_ceiling = Deadline::after(now, span).min(self.execution_ceiling);
            candidate = candidate.min(self.execution_ceiling);
        }

        self.next_execution = candidate;
    }

    /// Bypasses the debounce delay: due on the worker's next wake-up.
    pub(crate) fn execute_now(&mut self, now: Instant) {
        self.canceled = false;
        self.pending_triggers = self.pending_triggers.saturating_add(1);
        self.next_execution = Deadline::At(now);
    }

    /// Marks the outstanding trigger as canceled.
    ///
    /// Returns `false` when nothing was pending, in which case nothing changes.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.pending_triggers == 0 {
            return false;
        }
        self.canceled = true;
        true
    }

    /// Suspends or resumes firing.
    ///
    /// Resuming with work still pending re-triggers at the absolute minimum
    /// delay so the suppressed execution happens promptly.
    pub(crate) fn set_paused(&mut self, paused: bool, now: Instant, limits: Limits) {
        let was_paused = std::mem::replace(&mut self.paused, paused);

        if was_paused && !paused && self.pending_triggers > 0 && !self.canceled {
            self.trigger(now, ABSOLUTE_MINIMUM_DELAY, limits);
        }
    }

    /// Decides what the worker does at `now`, clearing pending state when the
    /// schedule is consumed.
    pub(crate) fn evaluate(&mut self, now: Instant) -> Evaluation {
        if self.canceled {
            self.clear();
            return Evaluation::Discarded;
        }

        if !self.next_execution.is_due(now) {
            return Evaluation::NotDue;
        }

        if self.paused {
            return Evaluation::Suppressed;
        }

        self.clear();
        Evaluation::Execute
    }

    /// How long the worker may sleep before it has to evaluate again.
    ///
    /// `None` means there is nothing to wait for and the worker sleeps until
    /// it is woken explicitly.
    pub(crate) fn sleep_duration(&self, now: Instant) -> Option<Duration> {
        if self.paused {
            return None;
        }
        self.next_execution
            .remaining(now)
            .map(|remaining| remaining.clamp(MINIMUM_SLEEP, MAXIMUM_SLEEP))
    }

    fn clear(&mut self) {
        self.canceled = false;
        self.next_execution = Deadline::Never;
        self.execution_ceiling = Deadline::Never;
        self.pending_triggers = 0;
    }

    pub(crate) const fn is_paused(&self) -> bool { self.paused }

    pub(crate) const fn is_destroyed(&self) -> bool { self.destroyed }

    pub(crate) const fn mark_destroyed(&mut self) { self.destroyed = true; }

    #[cfg(test)]
    pub(crate) const fn next_execution(&self) -> Deadline { self.next_execution }

    #[cfg(test)]
    pub(crate) const fn pending_triggers(&self) -> u32 { self.pending_triggers }
}
