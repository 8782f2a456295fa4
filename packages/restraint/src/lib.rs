//! Debounced deferred execution.
//!
//! A [`Defer`] coalesces many rapid [`trigger`](Defer::trigger) calls into a
//! single delayed invocation of an action. Two optional limits force the
//! action to run even under continuous triggering: a maximum total delay span
//! and a maximum number of coalesced triggers.
//!
//! ```no_run
//! use restraint::Defer;
//!
//! let defer = Defer::using_dedicated_thread()
//!     .named("reindex")
//!     .for_at_least_ms(100)
//!     .with_maximum_trigger_limit(20)
//!     .to_execute(|| println!("reindexing"))
//!     .build()?;
//!
//! for _ in 0..3 {
//!     defer.trigger()?;
//! }
//! defer.wait_for_next_execution();
//! # Ok::<(), restraint::DeferError>(())
//! ```

mod action;
mod builder;
mod config;
mod deadline;
mod defer;
mod error;
mod executor;
mod limit;
mod schedule;
mod stamp;

pub use action::{ActionFailure, ActionOutcome, BoxError};
pub use builder::DeferBuilder;
pub use config::{ConfigError, DeferConfig, ExecutorKind};
pub use defer::Defer;
pub use error::DeferError;
pub use executor::{DedicatedThread, Spawn, StopSignal, TaskPool, WorkerHandle, WorkerTask};
pub use limit::DeferLimit;
pub use schedule::ABSOLUTE_MINIMUM_DELAY;
