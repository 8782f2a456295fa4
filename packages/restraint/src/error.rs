//! Error types for restraint.
//!
//! Construction and usage errors are returned synchronously to the caller.
//! Failures raised by the deferred action itself never surface here; they are
//! delivered to the configured error handler as an [`ActionFailure`](crate::ActionFailure).

use thiserror::Error;

/// Errors returned by the builder and by operations on a [`Defer`](crate::Defer).
#[derive(Debug, Error)]
pub enum DeferError {
    /// `build()` was called without an action.
    #[error("Execution action must be specified")]
    MissingAction,
    /// `build()` was called without a delay.
    #[error("A positive delay must be specified")]
    MissingDelay,
    /// The timer was already disposed.
    #[error("Defer timer has been disposed")]
    Disposed,
    /// The executor could not start the worker.
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
    /// The worker terminated by panicking instead of returning.
    #[error("Worker terminated abnormally")]
    WorkerPanicked,
}
