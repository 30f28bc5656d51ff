//! Error types for stacksift.
//!
//! Library crates use [`StackSiftError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all stacksift operations.
#[derive(Debug, thiserror::Error)]
pub enum StackSiftError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Browser launch, context creation, or CDP command failure.
    #[error("browser error: {0}")]
    Browser(String),

    /// Page navigation failed.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// A bounded wait ran out of time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A structured-data extraction strategy failed.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// JSON or HTML parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Persistence layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (limit out of range, missing id, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StackSiftError>;

impl StackSiftError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for StackSiftError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string())
    }
}
