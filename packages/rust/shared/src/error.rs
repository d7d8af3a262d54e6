//! Error types for bidsqc.
//!
//! Library crates use [`BidsQcError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all bidsqc operations.
#[derive(Debug, thiserror::Error)]
pub enum BidsQcError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The dataset could not be indexed (missing root, unreadable tree, ...).
    #[error("dataset error: {0}")]
    Dataset(String),

    /// A required derivative file has no matching row for the subject.
    #[error("missing derivative for {subject}: no file matches `{field}`")]
    MissingDerivative { subject: String, field: String },

    /// Template download or cache error.
    #[error("template error: {0}")]
    Template(String),

    /// External report tool failed to spawn or exited unsuccessfully.
    #[error("report tool error: {0}")]
    ReportTool(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Record validation error (referenced file missing, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BidsQcError>;

impl BidsQcError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a missing-derivative error for a subject and record field.
    pub fn missing_derivative(subject: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingDerivative {
            subject: subject.into(),
            field: field.into(),
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
