//! Error types for the session runtime

use std::any::Any;
use std::path::PathBuf;

use thiserror::Error;

/// A pane id that is not one of the session's slots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentIdError {
    #[error("document slot {0} is out of range (1..=8)")]
    OutOfRange(u8),
    #[error("invalid document id {0:?}")]
    Invalid(String),
}

/// Errors raised by the underlying cyclic scheduler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("scheduler rejected pattern: {0}")]
    Rejected(String),
    #[error("invalid tempo: {0} cycles per second")]
    InvalidTempo(f64),
}

/// Errors that abort one evaluation. The document keeps its previous pattern.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The pattern runtime failed to execute the source text.
    #[error("{0}")]
    Runtime(String),
    /// The runtime, a bound pattern or the global transform panicked.
    #[error("evaluation panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Per-frame failures of the highlight loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DrawError {
    #[error("pattern query panicked: {0}")]
    QueryPanicked(String),
    #[error("renderer failed: {0}")]
    Renderer(String),
}

/// Errors loading a session configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot write config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Errors talking to a running session task.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session task has stopped")]
    Closed,
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
