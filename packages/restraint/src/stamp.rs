//! Execution version stamp.
//!
//! Waiters snapshot the execution counter, then block until it moves on or
//! the stamp is closed. The counter lives under its own lock so a waiter never
//! contends with producers on the schedule lock.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct StampState {
    executions: u64,
    closed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ExecutionStamp {
    state: Mutex<StampState>,
    changed: Condvar,
}

impl ExecutionStamp {
    pub(crate) fn current(&self) -> u64 { self.state.lock().executions }

    /// Records one more completed invocation and releases every waiter.
    pub(crate) fn advance(&self) {
        let mut state = self.state.lock();
        state.executions = state.executions.wrapping_add(1);
        drop(state);
        self.changed.notify_all();
    }

    /// Releases every current and future waiter; used on teardown.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }

    /// Blocks until the counter differs from `seen` or the stamp is closed.
    pub(crate) fn wait_past(&self, seen: u64) {
        let mut state = self.state.lock();
        self.changed
            .wait_while(&mut state, |state| state.executions == seen && !state.closed);
    }

    /// Like [`wait_past`](Self::wait_past) with an upper bound.
    ///
    /// Returns `true` only if an execution completed after `seen`.
    pub(crate) fn wait_past_for(&self, seen: u64, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let _ = self.changed.wait_while_for(
            &mut state,
            |state| state.executions == seen && !state.closed,
            timeout,
        );
        state.executions != seen
    }
}
