//! Error types for Chatterm
//!
//! This module defines the error types used throughout the dispatcher.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.
//!
//! Two families exist:
//!
//! - [`ChattermError`] for the library itself (loading, configuration,
//!   transport, watching, and handler faults surfaced to the caller).
//! - [`CommandError`] for the outcome of a single command handler, which
//!   separates user-input mistakes from internal failures.

use thiserror::Error;

/// The primary error type for Chatterm operations.
#[derive(Error, Debug)]
pub enum ChattermError {
    /// Configuration-related errors (invalid config, unreadable config file, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command unit could not be read, parsed, or validated.
    #[error("Failed to load unit {unit}: {message}")]
    Load { unit: String, message: String },

    /// A command key would shadow a key owned by another unit.
    #[error("Command '{key}' from unit {unit} conflicts with existing command from unit {existing_unit}")]
    DuplicateCommand {
        key: String,
        unit: String,
        existing_unit: String,
    },

    /// Transport errors (delivery failures, unknown destinations, etc.)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Module watcher failures.
    #[error("Watch error: {0}")]
    Watch(String),

    /// Malformed command line (unterminated quotes, etc.)
    #[error("Parse error: {0}")]
    Parse(String),

    /// A command handler failed with an internal error.
    #[error("Command '{command}' failed: {source:#}")]
    Handler {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem notification errors
    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    /// Resource not found (commands, units, destinations, etc.)
    #[error("Not found: {0}")]
    NotFound(String),
}

/// A specialized `Result` type for Chatterm operations.
pub type Result<T> = std::result::Result<T, ChattermError>;

/// Outcome of a failed command handler.
///
/// `Usage` is recoverable and answered with the command's usage text.
/// `Fault` is everything else: it is logged, answered with a generic
/// apology, and propagated to the caller.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The user supplied malformed arguments.
    #[error("incorrect usage{}", .0.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Usage(Option<String>),

    /// Any internal failure inside the handler.
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl CommandError {
    /// Usage failure without further detail.
    pub fn usage() -> Self {
        CommandError::Usage(None)
    }

    /// Usage failure with a short explanation for logs.
    pub fn usage_with(detail: impl Into<String>) -> Self {
        CommandError::Usage(Some(detail.into()))
    }

    /// Whether this is a user-input failure.
    pub fn is_usage(&self) -> bool {
        matches!(self, CommandError::Usage(_))
    }
}

impl From<ChattermError> for CommandError {
    fn from(err: ChattermError) -> Self {
        CommandError::Fault(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        CommandError::Fault(anyhow::Error::new(err))
    }
}

/// Result type returned by command handlers.
pub type CommandResult = std::result::Result<(), CommandError>;
