//! Error types for podwarden logging setup

use thiserror::Error;

/// Result type for logging operations
pub type LoggingResult<T> = Result<T, LoggingError>;

/// Errors raised while installing the tracing subscriber
#[derive(Error, Debug)]
pub enum LoggingError {
    /// The level string is not a valid filter directive
    #[error("Invalid log filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
