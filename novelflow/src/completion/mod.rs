//! The text-completion seam.
//!
//! Stages never talk to a provider directly: they receive an
//! `Arc<dyn CompletionFn>` and call it once per attempt. The HTTP client for
//! OpenAI-compatible endpoints lives behind the `http` feature.

#[cfg(feature = "http")]
mod openai;

#[cfg(feature = "http")]
pub use openai::{classify_status, OpenAiCompatibleClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::StageKind;
use crate::errors::CallError;

/// One completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The full prompt.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Per-call deadline.
    pub timeout: Duration,
    /// Stage issuing the call.
    pub stage: StageKind,
    /// Chapter index for fan-out units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<usize>,
}

impl CompletionRequest {
    /// Creates a request with the given prompt and stage.
    #[must_use]
    pub fn new(stage: StageKind, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout: Duration::from_secs(120),
            stage,
            unit: None,
        }
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the token limit.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the fan-out unit index.
    #[must_use]
    pub fn with_unit(mut self, unit: Option<usize>) -> Self {
        self.unit = unit;
        self
    }
}

/// An opaque text-completion function.
///
/// Implementations must be safe to call concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionFn: Send + Sync {
    /// Sends `request` and returns the raw response text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CallError>;
}
