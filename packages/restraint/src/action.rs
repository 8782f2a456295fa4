//! Deferred action and error-handler callbacks.
//!
//! The action runs on the worker, never on the caller's thread. Whatever it
//! raises (a returned `Err` or a panic) is captured here and turned into an
//! [`ActionFailure`] for the error handler; it never reaches the worker loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

/// Boxed error returned by a fallible action.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failure raised by the deferred action.
#[derive(Debug, Error)]
pub enum ActionFailure {
    /// The action returned an error.
    #[error("Action failed: {0}")]
    Failed(#[source] BoxError),
    /// The action panicked; the payload message is kept when it is a string.
    #[error("Action panicked: {0}")]
    Panicked(String),
}

/// Return types an action may have.
///
/// Infallible actions return `()`; fallible ones return a `Result` whose error
/// converts into a [`BoxError`].
pub trait ActionOutcome {
    /// Normalizes the outcome.
    ///
    /// # Errors
    ///
    /// Returns the action's own error, boxed.
    fn into_result(self) -> Result<(), BoxError>;
}

impl ActionOutcome for () {
    fn into_result(self) -> Result<(), BoxError> { Ok(()) }
}

impl<E> ActionOutcome for Result<(), E>
where E: Into<BoxError>
{
    fn into_result(self) -> Result<(), BoxError> { self.map_err(Into::into) }
}

pub(crate) type Action = Box<dyn FnMut() -> Result<(), BoxError> + Send + 'static>;

pub(crate) type ErrorHandler = Box<dyn FnMut(ActionFailure) + Send + 'static>;

pub(crate) fn boxed_action<F, R>(mut action: F) -> Action
where
    F: FnMut() -> R + Send + 'static,
    R: ActionOutcome,
{
    Box::new(move || action().into_result())
}

/// Runs the action once, capturing a returned error or a panic.
pub(crate) fn invoke(action: &mut Action) -> Result<(), ActionFailure> {
    match panic::catch_unwind(AssertUnwindSafe(|| action())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(ActionFailure::Failed(err)),
        Err(payload) => Err(ActionFailure::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
