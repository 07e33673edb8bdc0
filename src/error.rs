//! Error types for the keyword-sweep library.
//!
//! This module provides custom error types using `thiserror` so callers can
//! tell validation problems apart from persistence failures.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the keyword-sweep library.
#[derive(Error, Debug)]
pub enum KeywordSweepError {
    /// Input rejected before any work started
    #[error("Validation error: {0}")]
    Validation(String),

    /// Writing the store file failed
    #[error("Failed to write store file {path}: {source}")]
    StoreWrite {
        /// Primary store location that could not be replaced
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV reading or writing errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Lookup client could not be constructed
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

impl KeywordSweepError {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True when the error came from rejected input rather than a runtime fault.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Convenience type alias for Result with `KeywordSweepError`
pub type Result<T> = std::result::Result<T, KeywordSweepError>;

impl From<anyhow::Error> for KeywordSweepError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<config::ConfigError> for KeywordSweepError {
    fn from(err: config::ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

impl From<reqwest::Error> for KeywordSweepError {
    fn from(err: reqwest::Error) -> Self {
        Self::Lookup(err.to_string())
    }
}
