//! Error types for the novelflow crate.
//!
//! The taxonomy follows how failures propagate through a generation run:
//! parse and validation errors become stage failures, call errors may be
//! retried for the early stages, and configuration errors are rejected before
//! any task exists.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::core::StageKind;

/// The main error type for novelflow operations.
#[derive(Debug, Error)]
pub enum NovelflowError {
    /// Structured data could not be recovered from a model response.
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// A parsed value did not match its stage schema.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The completion call failed.
    #[error("{0}")]
    Call(#[from] CallError),

    /// The request or configuration was rejected up front.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The task store rejected an operation.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Work was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias used across the crate.
pub type Result<T, E = NovelflowError> = std::result::Result<T, E>;

/// Raised when every repair pass failed to produce parseable data.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Failed to parse structured response: {reason}")]
pub struct ParseError {
    /// The last parser error message.
    pub reason: String,
    /// Bounded preview of the last cleaned candidate.
    pub preview: String,
}

impl ParseError {
    /// Creates a new parse error.
    #[must_use]
    pub fn new(reason: impl Into<String>, preview: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            preview: preview.into(),
        }
    }
}

/// Raised when a parsed value does not conform to a stage schema.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Validation failed for {stage} stage: {message}")]
pub struct ValidationError {
    /// The stage whose schema was violated.
    pub stage: StageKind,
    /// What was wrong.
    pub message: String,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(stage: StageKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Errors surfaced by a completion call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CallError {
    /// Network hiccup, rate limit, or server error; safe to retry.
    #[error("Transient completion error: {message}")]
    Transient {
        /// Error description.
        message: String,
    },

    /// Rejected request, bad credentials, malformed response; do not retry.
    #[error("Permanent completion error: {message}")]
    Permanent {
        /// Error description.
        message: String,
    },

    /// The per-call deadline elapsed.
    #[error("Completion call timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },
}

impl CallError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns true if a retry may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

/// Fatal configuration errors, raised before any task is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A batch was submitted without variants.
    #[error("Batch '{batch}' has no variants")]
    NoVariants {
        /// The batch name.
        batch: String,
    },

    /// A variant asked for zero chapters.
    #[error("Variant {variant} requests an empty chapter list")]
    EmptyChapterList {
        /// Zero-based variant index.
        variant: usize,
    },

    /// Variant parameters could not be interpreted.
    #[error("Variant {variant} has invalid parameters: {message}")]
    InvalidParameters {
        /// Zero-based variant index.
        variant: usize,
        /// The deserialization error.
        message: String,
    },

    /// A configuration value is out of range.
    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue {
        /// The field name.
        field: String,
        /// Why it is invalid.
        message: String,
    },

    /// An environment variable could not be parsed.
    #[error("Environment variable {var} has unparseable value '{value}'")]
    EnvVar {
        /// Variable name.
        var: String,
        /// Raw value.
        value: String,
    },

    /// A configuration file could not be read or decoded.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by a task store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No task with this id.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// No batch with this id.
    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),

    /// Backend failure.
    #[error("Task store backend error: {0}")]
    Backend(String),
}
