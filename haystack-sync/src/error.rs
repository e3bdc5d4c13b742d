//! Error types for the sync layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed input detected before or during a run.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid identifier, tag or hierarchy in the data model.
    #[error(transparent)]
    Types(#[from] haystack_types::Error),

    /// Network, timeout or 5xx failure from a remote system.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// Permanent rejection from a remote system.
    #[error("remote error: {0}")]
    Remote(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An ancestor could not be established.
    #[error("hierarchy failure: {0}")]
    Hierarchy(String),

    /// An identity has no usable sink reference.
    #[error("unresolved reference: {0}")]
    Unresolved(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Job file error.
    #[error("job file error: {0}")]
    JobFile(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SyncError {
    /// Returns true for errors a retry may clear.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }

    /// Classifies the error for per-item reporting.
    #[must_use]
    pub fn failure(&self) -> Failure {
        let class = match self {
            SyncError::Validation(_)
            | SyncError::Types(_)
            | SyncError::Config(_)
            | SyncError::JobFile(_)
            | SyncError::Serialization(_)
            | SyncError::Yaml(_) => FailureClass::Validation,
            SyncError::Transient(_) | SyncError::Io(_) => FailureClass::Transient,
            SyncError::Remote(_) | SyncError::NotFound(_) => FailureClass::Remote,
            SyncError::Hierarchy(_) | SyncError::Unresolved(_) => FailureClass::Hierarchy,
        };
        Failure {
            class,
            message: self.to_string(),
        }
    }
}

/// Coarse category of a per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Validation,
    Transient,
    Remote,
    Hierarchy,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureClass::Validation => "validation",
            FailureClass::Transient => "transient",
            FailureClass::Remote => "remote",
            FailureClass::Hierarchy => "hierarchy",
        })
    }
}

/// Cloneable record of a failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub class: FailureClass,
    pub message: String,
}

impl Failure {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.class, self.message)
    }
}

impl From<&SyncError> for Failure {
    fn from(err: &SyncError) -> Self {
        err.failure()
    }
}
