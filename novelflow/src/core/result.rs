//! Stage results and failure descriptions.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::{ParsedArtifact, StageKind};
use crate::errors::{CallError, ParseError, ValidationError};
use crate::utils::bounded_preview;

/// Raw text returned by the completion function.
///
/// Never persisted; only a bounded preview survives, and only on failure.
#[derive(Debug, Clone)]
pub struct RawModelResponse {
    /// The full response text.
    pub text: String,
    /// Stage that requested it.
    pub stage: StageKind,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl RawModelResponse {
    /// Creates a new raw response.
    #[must_use]
    pub fn new(text: impl Into<String>, stage: StageKind, attempt: u32) -> Self {
        Self {
            text: text.into(),
            stage,
            attempt,
        }
    }

    /// Returns at most `limit` characters of the response.
    #[must_use]
    pub fn preview(&self, limit: usize) -> String {
        bounded_preview(&self.text, limit)
    }
}

/// Category of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    /// The completion call failed.
    Call {
        /// Whether a retry could succeed.
        transient: bool,
    },
    /// The per-call deadline elapsed.
    Timeout,
    /// No structured data could be recovered.
    Parse,
    /// Parsed data did not match the stage schema.
    Validation,
    /// The stage was cancelled.
    Cancelled,
    /// The unit's worker panicked.
    Internal,
}

impl FailureKind {
    /// Short stable code for logs and diagnostics.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Call { transient: true } => "call_transient",
            Self::Call { transient: false } => "call_permanent",
            Self::Timeout => "timeout",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A failed stage execution.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{stage} stage failed ({kind}): {reason}")]
pub struct StageFailure {
    /// The stage that failed.
    pub stage: StageKind,
    /// Chapter index for fan-out units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<usize>,
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable reason.
    pub reason: String,
    /// Bounded preview of the offending response, for parse/validation failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_preview: Option<String>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl StageFailure {
    /// Creates a failure with no preview.
    #[must_use]
    pub fn new(stage: StageKind, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            stage,
            unit: None,
            kind,
            reason: reason.into(),
            raw_preview: None,
            attempt: 1,
        }
    }

    /// Builds a failure from a completion call error.
    #[must_use]
    pub fn from_call(stage: StageKind, error: &CallError) -> Self {
        let kind = match error {
            CallError::Timeout { .. } => FailureKind::Timeout,
            other => FailureKind::Call {
                transient: other.is_transient(),
            },
        };
        Self::new(stage, kind, error.to_string())
    }

    /// Builds a failure from a parse error, keeping its preview.
    #[must_use]
    pub fn from_parse(stage: StageKind, error: &ParseError) -> Self {
        Self::new(stage, FailureKind::Parse, error.to_string()).with_raw_preview(error.preview.clone())
    }

    /// Builds a failure from a validation error.
    #[must_use]
    pub fn from_validation(error: &ValidationError) -> Self {
        Self::new(error.stage, FailureKind::Validation, error.message.clone())
    }

    /// Builds a cancellation failure.
    #[must_use]
    pub fn cancelled(stage: StageKind, reason: impl Into<String>) -> Self {
        Self::new(stage, FailureKind::Cancelled, reason)
    }

    /// Sets the fan-out unit index.
    #[must_use]
    pub fn with_unit(mut self, unit: usize) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Attaches a raw preview.
    #[must_use]
    pub fn with_raw_preview(mut self, preview: impl Into<String>) -> Self {
        self.raw_preview = Some(preview.into());
        self
    }

    /// Sets the attempt number.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Returns true for transient call errors and timeouts.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Call { transient: true } | FailureKind::Timeout)
    }
}

/// Outcome of one stage execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    /// The stage produced a schema-conforming artifact.
    Success(ParsedArtifact),
    /// The stage failed.
    Failure(StageFailure),
}

impl StageResult {
    /// Returns true on success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Converts into a standard `Result`.
    pub fn into_result(self) -> Result<ParsedArtifact, StageFailure> {
        match self {
            Self::Success(artifact) => Ok(artifact),
            Self::Failure(failure) => Err(failure),
        }
    }
}
