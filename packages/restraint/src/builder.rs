//! Fluent configuration builder, the only way to construct a [`Defer`].
//!
//! Setters only accumulate; nothing is validated until [`DeferBuilder::build`],
//! which also starts the worker.

use std::time::Duration;

use crate::action::{self, Action, ActionFailure, ActionOutcome, ErrorHandler};
use crate::config::DeferConfig;
use crate::defer::{Defer, Settings};
use crate::error::DeferError;
use crate::executor::{self, Spawn};
use crate::limit::Limits;
use crate::schedule::ABSOLUTE_MINIMUM_DELAY;

/// Accumulates the settings of a [`Defer`].
///
/// # Example
///
/// ```no_run
/// use restraint::Defer;
///
/// let defer = Defer::using_dedicated_thread()
///     .named("autosave")
///     .for_at_least_ms(250)
///     .with_maximum_delay_ms(2_000)
///     .to_execute(|| println!("saving"))
///     .build()?;
///
/// defer.trigger()?;
/// # Ok::<(), restraint::DeferError>(())
/// ```
pub struct DeferBuilder {
    name: Option<String>,
    delay: Option<Duration>,
    maximum_delay_span: Option<Duration>,
    maximum_trigger_count: Option<u32>,
    action: Option<Action>,
    on_error: Option<ErrorHandler>,
    spawner: Box<dyn Spawn>,
}

impl DeferBuilder {
    /// Creates an empty builder on the default executor.
    #[must_use]
    pub fn new() -> Self { Self::with_spawner(executor::default_spawner()) }

    pub(crate) fn with_spawner(spawner: Box<dyn Spawn>) -> Self {
        Self {
            name: None,
            delay: None,
            maximum_delay_span: None,
            maximum_trigger_count: None,
            action: None,
            on_error: None,
            spawner,
        }
    }

    /// Sets the diagnostic label, also used to name the worker thread.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the base debounce delay.
    #[must_use]
    pub const fn for_at_least(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub const fn for_at_least_ms(self, delay_ms: u64) -> Self {
        self.for_at_least(Duration::from_millis(delay_ms))
    }

    /// Caps the total time execution may be deferred, measured from the first
    /// trigger after the previous execution.
    #[must_use]
    pub const fn with_maximum_delay(mut self, span: Duration) -> Self {
        self.maximum_delay_span = Some(span);
        self
    }

    #[must_use]
    pub const fn with_maximum_delay_ms(self, span_ms: u64) -> Self {
        self.with_maximum_delay(Duration::from_millis(span_ms))
    }

    /// Forces execution once this many triggers have been coalesced.
    #[must_use]
    pub const fn with_maximum_trigger_limit(mut self, count: u32) -> Self {
        self.maximum_trigger_count = Some(count);
        self
    }

    /// Sets the action. It may return `()` or a `Result`; errors and panics go
    /// to the error handler.
    #[must_use]
    pub fn to_execute<F, R>(mut self, action: F) -> Self
    where
        F: FnMut() -> R + Send + 'static,
        R: ActionOutcome,
    {
        self.action = Some(action::boxed_action(action));
        self
    }

    /// Sets the sink for action failures.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where F: FnMut(ActionFailure) + Send + 'static {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Applies every field present in `config`. The executor is not changed;
    /// use [`DeferConfig::builder`] to honor the configured executor as well.
    #[must_use]
    pub fn with_config(mut self, config: &DeferConfig) -> Self {
        if let Some(name) = &config.name {
            self.name = Some(name.clone());
        }
        if let Some(delay_ms) = config.delay_ms {
            self.delay = Some(Duration::from_millis(delay_ms));
        }
        if let Some(span_ms) = config.max_delay_ms {
            self.maximum_delay_span = Some(Duration::from_millis(span_ms));
        }
        if let Some(count) = config.max_triggers {
            self.maximum_trigger_count = Some(count);
        }
        self
    }

    /// Builds the timer and starts its worker.
    ///
    /// Delays below 5 ms are raised to 5 ms.
    ///
    /// # Errors
    ///
    /// Returns `DeferError::MissingAction` or `DeferError::MissingDelay` when
    /// a required setting is absent, and `DeferError::Spawn` when the worker
    /// could not be started.
    pub fn build(self) -> Result<Defer, DeferError> {
        let action = self.action.ok_or(DeferError::MissingAction)?;
        let delay = self.delay.ok_or(DeferError::MissingDelay)?;

        let settings = Settings {
            name: self.name,
            delay: delay.max(ABSOLUTE_MINIMUM_DELAY),
            limits: Limits {
                span: self.maximum_delay_span,
                count: self.maximum_trigger_count,
            },
        };

        Defer::start(settings, action, self.on_error, self.spawner.as_ref())
    }
}

impl Default for DeferBuilder {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for DeferBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferBuilder")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("maximum_delay_span", &self.maximum_delay_span)
            .field("maximum_trigger_count", &self.maximum_trigger_count)
            .field("has_action", &self.action.is_some())
            .field("has_error_handler", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}
