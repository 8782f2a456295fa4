//! The deferred-execution timer.
//!
//! A [`Defer`] coalesces rapid triggers into a single delayed invocation of
//! its action. All callers and the worker serialize through one schedule lock;
//! the action itself always runs outside it, on the worker.
//!
//! # Worker Loop
//!
//! ```text
//!   ┌──────────── evaluate schedule (locked) ◄──────────────┐
//!   │                     │                                 │
//!   │ Execute             │ NotDue / Discarded / Suppressed │
//!   ▼                     ▼                                 │
//! run action (unlocked)  sleep until deadline or woken ─────┘
//!   │                     ▲
//!   └── advance stamp ────┘
//! ```
//!
//! The loop exits once the timer is destroyed and then releases every waiter.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::action::{self, Action, ActionFailure, ActionOutcome, ErrorHandler};
use crate::builder::DeferBuilder;
use crate::error::DeferError;
use crate::executor::{DedicatedThread, Spawn, StopSignal, TaskPool, WorkerHandle};
use crate::limit::{DeferLimit, Limits};
use crate::schedule::{Evaluation, Schedule};
use crate::stamp::ExecutionStamp;

/// Immutable settings a timer is built with.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) name: Option<String>,
    pub(crate) delay: Duration,
    pub(crate) limits: Limits,
}

/// State shared between the public handle and the worker.
struct Shared {
    settings: Settings,
    schedule: Mutex<Schedule>,
    /// Wakes the worker whenever the schedule changes.
    wake: Condvar,
    stamp: ExecutionStamp,
    worker_thread: OnceLock<ThreadId>,
}

impl Shared {
    fn label(&self) -> &str { self.settings.name.as_deref().unwrap_or("unnamed") }

    fn is_worker_thread(&self) -> bool {
        self.worker_thread.get().is_some_and(|id| *id == thread::current().id())
    }

    /// Applies `change` to the schedule and wakes the worker.
    fn mutate<R>(&self, change: impl FnOnce(&mut Schedule, Instant) -> R) -> Result<R, DeferError> {
        let mut schedule = self.schedule.lock();
        if schedule.is_destroyed() {
            return Err(DeferError::Disposed);
        }
        let result = change(&mut schedule, Instant::now());
        drop(schedule);
        self.wake.notify_one();
        Ok(result)
    }

    /// Marks the timer destroyed and wakes the worker so it exits.
    ///
    /// Returns `false` if it was already destroyed.
    fn shut_down(&self) -> bool {
        {
            let mut schedule = self.schedule.lock();
            if schedule.is_destroyed() {
                return false;
            }
            schedule.mark_destroyed();
        }
        self.wake.notify_all();
        true
    }
}

/// A debounced deferred-execution timer.
///
/// Created only through a [`DeferBuilder`]. The worker starts before
/// `build()` returns and runs until the timer is disposed, either explicitly
/// through [`dispose`](Self::dispose) or when the `Defer` is dropped.
///
/// # Thread Safety
///
/// Every operation takes `&self` and may be called from any thread. The
/// action runs on the worker, one invocation at a time.
pub struct Defer {
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl Defer {
    // ========================================================================
    // Builder entry points
    // ========================================================================

    /// Starts a builder with the given action on the default executor: the
    /// current tokio runtime's blocking pool if called inside one, a
    /// dedicated thread otherwise.
    ///
    /// A timer on the task pool is disposed when its runtime shuts down.
    #[must_use]
    pub fn to_execute<F, R>(action: F) -> DeferBuilder
    where
        F: FnMut() -> R + Send + 'static,
        R: ActionOutcome,
    {
        DeferBuilder::new().to_execute(action)
    }

    /// Starts a builder whose worker runs on `handle`'s blocking pool.
    ///
    /// The timer is disposed when that runtime shuts down; operations after
    /// that return `DeferError::Disposed`.
    #[must_use]
    pub fn using_task_pool(handle: tokio::runtime::Handle) -> DeferBuilder {
        Self::using(TaskPool::new(handle))
    }

    /// Starts a builder whose worker runs on its own OS thread.
    #[must_use]
    pub fn using_dedicated_thread() -> DeferBuilder { Self::using(DedicatedThread) }

    /// Starts a builder with a custom execution context.
    #[must_use]
    pub fn using<S: Spawn + 'static>(spawner: S) -> DeferBuilder {
        DeferBuilder::with_spawner(Box::new(spawner))
    }

    /// Builds the shared state and starts the worker on `spawner`.
    pub(crate) fn start(
        settings: Settings,
        action: Action,
        on_error: Option<ErrorHandler>,
        spawner: &dyn Spawn,
    ) -> Result<Self, DeferError> {
        let shared = Arc::new(Shared {
            settings,
            schedule: Mutex::new(Schedule::default()),
            wake: Condvar::new(),
            stamp: ExecutionStamp::default(),
            worker_thread: OnceLock::new(),
        });

        let thread_name = shared.settings.name.clone().unwrap_or_else(|| "defer".to_string());
        let worker_shared = Arc::clone(&shared);
        let stop = {
            let shared = Arc::downgrade(&shared);
            StopSignal::new(move || {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                if shared.shut_down() {
                    tracing::debug!(name = shared.label(), "defer: execution context shut down");
                }
            })
        };
        let handle = spawner.spawn(
            &thread_name,
            Box::new(move || run_worker(&worker_shared, action, on_error)),
            stop,
        )?;

        Ok(Self { shared, worker: Mutex::new(Some(handle)) })
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Schedules the action after the configured delay, replacing any pending
    /// deadline (debounce), unless a configured limit forces it sooner.
    ///
    /// # Errors
    ///
    /// Returns `DeferError::Disposed` if the timer was disposed.
    pub fn trigger(&self) -> Result<(), DeferError> {
        self.trigger_with_interval(self.shared.settings.delay)
    }

    /// Like [`trigger`](Self::trigger) with an explicit delay for this request.
    ///
    /// Intervals below 5 ms are raised to 5 ms.
    ///
    /// # Errors
    ///
    /// Returns `DeferError::Disposed` if the timer was disposed.
    pub fn trigger_with_interval(&self, interval: Duration) -> Result<(), DeferError> {
        let limits = self.shared.settings.limits;
        self.shared.mutate(|schedule, now| schedule.trigger(now, interval, limits))
    }

    /// Bypasses the debounce delay: the action runs on the worker's next wake-up.
    ///
    /// # Errors
    ///
    /// Returns `DeferError::Disposed` if the timer was disposed.
    pub fn execute_now(&self) -> Result<(), DeferError> {
        self.shared.mutate(|schedule, now| schedule.execute_now(now))
    }

    /// Cancels the outstanding trigger, if any.
    ///
    /// An invocation that is already running is not affected.
    ///
    /// # Errors
    ///
    /// Returns `DeferError::Disposed` if the timer was disposed.
    pub fn cancel_pending(&self) -> Result<(), DeferError> {
        self.shared.mutate(|schedule, _| {
            schedule.cancel();
        })
    }

    /// Suspends or resumes firing without losing the schedule.
    ///
    /// Resuming while an execution is pending re-triggers it after the
    /// absolute minimum delay.
    ///
    /// # Errors
    ///
    /// Returns `DeferError::Disposed` if the timer was disposed.
    pub fn set_paused(&self, paused: bool) -> Result<(), DeferError> {
        let limits = self.shared.settings.limits;
        self.shared.mutate(|schedule, now| schedule.set_paused(paused, now, limits))
    }

    // ========================================================================
    // Blocking waits
    // ========================================================================

    /// Triggers and blocks until an execution completes.
    ///
    /// Returns immediately if the timer is disposed, or when called from the
    /// action itself.
    pub fn trigger_and_wait(&self) { self.run_and_wait(Self::trigger); }

    /// Triggers with an explicit interval and blocks until an execution completes.
    pub fn trigger_with_interval_and_wait(&self, interval: Duration) {
        self.run_and_wait(|defer| defer.trigger_with_interval(interval));
    }

    /// Executes immediately and blocks until the execution completes.
    pub fn execute_now_and_wait(&self) { self.run_and_wait(Self::execute_now); }

    /// Blocks until the next execution completes, without scheduling one.
    pub fn wait_for_next_execution(&self) { self.run_and_wait(|_| Ok(())); }

    /// Blocks until the next execution completes or `timeout` elapses.
    ///
    /// Returns `true` if an execution completed.
    #[must_use]
    pub fn wait_for_next_execution_timeout(&self, timeout: Duration) -> bool {
        match self.begin_wait(|_| Ok(())) {
            Some(seen) => self.shared.stamp.wait_past_for(seen, timeout),
            None => false,
        }
    }

    /// Snapshots the stamp, then performs `operation`.
    ///
    /// Returns the snapshot, or `None` when there is nothing to wait for.
    fn begin_wait(&self, operation: impl FnOnce(&Self) -> Result<(), DeferError>) -> Option<u64> {
        if self.shared.is_worker_thread() {
            tracing::warn!(name = self.shared.label(), "defer: wait requested from the action, ignoring");
            return None;
        }
        if self.is_disposed() {
            return None;
        }
        let seen = self.shared.stamp.current();
        operation(self).ok().map(|()| seen)
    }

    fn run_and_wait(&self, operation: impl FnOnce(&Self) -> Result<(), DeferError>) {
        if let Some(seen) = self.begin_wait(operation) {
            self.shared.stamp.wait_past(seen);
        }
    }

    // ========================================================================
    // Async waits
    // ========================================================================

    /// Async form of [`trigger_and_wait`](Self::trigger_and_wait).
    ///
    /// The wait is parked on the tokio blocking pool.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub async fn trigger_and_wait_async(&self) { self.run_and_wait_async(Self::trigger).await; }

    /// Async form of [`trigger_with_interval_and_wait`](Self::trigger_with_interval_and_wait).
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub async fn trigger_with_interval_and_wait_async(&self, interval: Duration) {
        self.run_and_wait_async(|defer| defer.trigger_with_interval(interval)).await;
    }

    /// Async form of [`execute_now_and_wait`](Self::execute_now_and_wait).
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub async fn execute_now_and_wait_async(&self) {
        self.run_and_wait_async(Self::execute_now).await;
    }

    /// Async form of [`wait_for_next_execution`](Self::wait_for_next_execution).
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub async fn wait_for_next_execution_async(&self) {
        self.run_and_wait_async(|_| Ok(())).await;
    }

    async fn run_and_wait_async(&self, operation: impl FnOnce(&Self) -> Result<(), DeferError>) {
        let Some(seen) = self.begin_wait(operation) else {
            return;
        };

        let shared = Arc::clone(&self.shared);
        if let Err(err) = tokio::task::spawn_blocking(move || shared.stamp.wait_past(seen)).await {
            tracing::warn!(name = self.shared.label(), error = %err, "defer: async wait aborted");
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[must_use]
    pub fn name(&self) -> Option<&str> { self.shared.settings.name.as_deref() }

    /// The base debounce delay (never below 5 ms).
    #[must_use]
    pub fn delay(&self) -> Duration { self.shared.settings.delay }

    #[must_use]
    pub fn maximum_delay_span(&self) -> Option<Duration> { self.shared.settings.limits.span }

    #[must_use]
    pub fn maximum_trigger_limit(&self) -> Option<u32> { self.shared.settings.limits.count }

    #[must_use]
    pub fn limit_type(&self) -> DeferLimit { self.shared.settings.limits.kind() }

    #[must_use]
    pub fn is_paused(&self) -> bool { self.shared.schedule.lock().is_paused() }

    /// Number of completed action invocations, failed ones included.
    #[must_use]
    pub fn execution_count(&self) -> u64 { self.shared.stamp.current() }

    #[must_use]
    pub fn is_disposed(&self) -> bool { self.shared.schedule.lock().is_destroyed() }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Stops the worker and waits for it to exit.
    ///
    /// Idempotent. Pending work is dropped without executing; every blocked
    /// waiter is released. Concurrent callers all return only once the worker
    /// has exited. When called from inside the action the timer is marked
    /// disposed and the worker exits after the action returns.
    pub fn dispose(&self) {
        self.shared.shut_down();

        if self.shared.is_worker_thread() {
            tracing::debug!(name = self.shared.label(), "defer: disposed from the action, not joining");
            return;
        }

        // Held across the join: a concurrent caller blocks here until the
        // worker is gone.
        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return;
        };

        if let Err(err) = handle.join() {
            tracing::warn!(name = self.shared.label(), error = %err, "defer: worker join failed");
        }
        drop(worker);
        tracing::debug!(name = self.shared.label(), "defer: disposed");
    }
}

impl Drop for Defer {
    fn drop(&mut self) { self.dispose(); }
}

impl std::fmt::Debug for Defer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Defer")
            .field("name", &self.shared.settings.name)
            .field("delay", &self.shared.settings.delay)
            .field("limits", &self.shared.settings.limits)
            .field("executions", &self.execution_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Closes the stamp when the worker exits, however it exits.
struct ReleaseWaiters<'a>(&'a ExecutionStamp);

impl Drop for ReleaseWaiters<'_> {
    fn drop(&mut self) { self.0.close(); }
}

fn run_worker(shared: &Shared, mut action: Action, mut on_error: Option<ErrorHandler>) {
    let _ = shared.worker_thread.set(thread::current().id());
    let _release = ReleaseWaiters(&shared.stamp);

    tracing::debug!(
        name = shared.label(),
        delay = ?shared.settings.delay,
        "defer: worker started"
    );

    let mut schedule = shared.schedule.lock();
    loop {
        if schedule.is_destroyed() {
            break;
        }

        match schedule.evaluate(Instant::now()) {
            Evaluation::Execute => {
                MutexGuard::unlocked(&mut schedule, || {
                    execute(shared, &mut action, on_error.as_mut());
                });
            }
            Evaluation::Discarded => {
                tracing::trace!(name = shared.label(), "defer: pending trigger canceled");
            }
            Evaluation::Suppressed => {
                tracing::trace!(name = shared.label(), "defer: deadline reached while paused");
            }
            Evaluation::NotDue => {}
        }

        if schedule.is_destroyed() {
            break;
        }

        match schedule.sleep_duration(Instant::now()) {
            Some(timeout) => {
                let _ = shared.wake.wait_for(&mut schedule, timeout);
            }
            None => shared.wake.wait(&mut schedule),
        }
    }
    drop(schedule);

    tracing::debug!(name = shared.label(), "defer: worker stopped");
}

/// Runs the action once and publishes the completion.
fn execute(shared: &Shared, action: &mut Action, on_error: Option<&mut ErrorHandler>) {
    tracing::trace!(name = shared.label(), "defer: executing");

    if let Err(failure) = action::invoke(action) {
        report_failure(shared, failure, on_error);
    }

    shared.stamp.advance();
}

fn report_failure(shared: &Shared, failure: ActionFailure, on_error: Option<&mut ErrorHandler>) {
    let Some(handler) = on_error else {
        tracing::warn!(name = shared.label(), error = %failure, "defer: action failed");
        return;
    };

    if panic::catch_unwind(AssertUnwindSafe(|| handler(failure))).is_err() {
        tracing::error!(name = shared.label(), "defer: error handler panicked");
    }
}
