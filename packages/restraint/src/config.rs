//! File-based timer configuration.
//!
//! A configuration file is JSONC (JSON with comments): both single-line
//! (`//`) and multi-line (`/* */`) comments are stripped before parsing.
//!
//! ```jsonc
//! {
//!   // Coalesce bursts of edits into one save.
//!   "name": "autosave",
//!   "delayMs": 250,
//!   "maxDelayMs": 2000,
//!   "maxTriggers": 50,
//!   "executor": "taskPool"
//! }
//! ```

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::builder::DeferBuilder;
use crate::defer::Defer;
use crate::executor::TaskPool;

/// Errors that can occur while loading or applying a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file contains invalid JSON.
    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),
    /// `taskPool` was requested outside a tokio runtime.
    #[error("The taskPool executor requires a running tokio runtime")]
    NoRuntime,
}

/// Where the worker loop runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExecutorKind {
    /// A dedicated OS thread.
    #[default]
    Thread,
    /// The current tokio runtime's blocking pool.
    TaskPool,
}

/// Timer settings as they appear in a configuration file.
///
/// Every field is optional; absent fields leave the builder untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct DeferConfig {
    /// Diagnostic label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Base debounce delay in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Span limit in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    /// Trigger-count limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_triggers: Option<u32>,
    pub executor: ExecutorKind,
}

impl DeferConfig {
    /// Parses a JSONC document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the document is not valid JSON once
    /// comments are stripped.
    pub fn parse_jsonc(text: &str) -> Result<Self, ConfigError> {
        Self::from_reader(text.as_bytes())
    }

    /// Loads a JSONC configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read and
    /// `ConfigError::Parse` if it contains invalid JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;
        let config = Self::from_reader(file)?;
        tracing::debug!(path = %path.display(), "defer: loaded configuration");
        Ok(config)
    }

    fn from_reader(reader: impl Read) -> Result<Self, ConfigError> {
        let reader = json_comments::StripComments::new(reader);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Creates a builder on the configured executor with every present field applied.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoRuntime` if the `taskPool` executor is
    /// configured but no tokio runtime is running.
    pub fn builder(&self) -> Result<DeferBuilder, ConfigError> {
        let builder = match self.executor {
            ExecutorKind::Thread => Defer::using_dedicated_thread(),
            ExecutorKind::TaskPool => Defer::using(TaskPool::current().ok_or(ConfigError::NoRuntime)?),
        };
        Ok(builder.with_config(self))
    }
}
