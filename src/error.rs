// src/error.rs

//! Unified error handling for the sync engine.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
///
/// Per-record network failures are modelled separately by
/// [`FetchError`](crate::services::FetchError) and never surface here;
/// everything in this enum is systemic and aborts the current phase.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Regex compilation failed
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A checkpoint requested for resume could not be read
    #[error("Checkpoint at {path} is unreadable: {reason}")]
    CheckpointUnreadable { path: String, reason: String },

    /// Destination snapshot could not be fetched or cached
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Partition harvest failed
    #[error("Source error for {context}: {message}")]
    Source { context: String, message: String },

    /// Destination rejected a request
    #[error("Destination error: {0}")]
    Destination(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a checkpoint error for the given file.
    pub fn checkpoint_unreadable(path: &Path, reason: impl fmt::Display) -> Self {
        Self::CheckpointUnreadable {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a snapshot error.
    pub fn snapshot(message: impl fmt::Display) -> Self {
        Self::Snapshot(message.to_string())
    }

    /// Create a source error with context.
    pub fn source(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Source {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a destination error.
    pub fn destination(message: impl fmt::Display) -> Self {
        Self::Destination(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_error_names_the_file() {
        let err = AppError::checkpoint_unreadable(Path::new("runs/x/resume_checkpoint.json"), "eof");
        let text = err.to_string();
        assert!(text.contains("runs/x/resume_checkpoint.json"));
        assert!(text.contains("eof"));
    }

    #[test]
    fn source_error_formatting() {
        let err = AppError::source("partition AZ", "connection reset");
        assert_eq!(
            err.to_string(),
            "Source error for partition AZ: connection reset"
        );
    }
}
