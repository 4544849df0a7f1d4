//! OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CompletionFn, CompletionRequest};
use crate::config::ProviderConfig;
use crate::errors::{CallError, ConfigError};
use crate::utils::bounded_preview;

/// Calls `{base_url}/chat/completions` with a single user message.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OpenAiCompatibleClient {
    /// Builds a client from provider settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the API key is missing or not a valid
    /// header value, or the HTTP client cannot be built.
    pub fn new(provider: &ProviderConfig) -> Result<Self, ConfigError> {
        if provider.api_key.trim().is_empty() {
            return Err(ConfigError::invalid_value("provider.api_key", "must not be empty"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", provider.api_key))
            .map_err(|_| ConfigError::invalid_value("provider.api_key", "not a valid header value"))?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::Load(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            model: provider.model.clone(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: [ApiMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

/// Maps an HTTP error status to a call error.
///
/// 408, 429 and 5xx are transient; every other status is permanent.
#[must_use]
pub fn classify_status(status: StatusCode, message: impl Into<String>) -> CallError {
    let message = format!("HTTP {}: {}", status.as_u16(), message.into());
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CallError::transient(message)
    } else {
        CallError::permanent(message)
    }
}

fn classify_transport(err: &reqwest::Error, request: &CompletionRequest) -> CallError {
    if err.is_timeout() {
        CallError::timeout(request.timeout)
    } else if err.is_builder() {
        CallError::permanent(err.to_string())
    } else {
        CallError::transient(err.to_string())
    }
}

#[async_trait]
impl CompletionFn for OpenAiCompatibleClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CallError> {
        let body = ChatApiRequest {
            model: &self.model,
            messages: [ApiMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(self.chat_url())
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e, request))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| classify_transport(&e, request))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ChatApiResponse>(&text)
                .ok()
                .and_then(|r| r.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| bounded_preview(&text, 200));
            return Err(classify_status(status, message));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&text)
            .map_err(|e| CallError::permanent(format!("Malformed completion body: {e}")))?;
        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| CallError::permanent("Completion response has no choices"))?;

        if choice.finish_reason.as_deref() == Some("length") {
            warn!(
                stage = %request.stage,
                unit = ?request.unit,
                max_tokens = request.max_tokens,
                "Completion truncated at token limit"
            );
        }

        let content = choice
            .message
            .and_then(|m| m.content)
            .ok_or_else(|| CallError::permanent("Completion response has no content"))?;
        debug!(stage = %request.stage, length = content.len(), "Completion received");
        Ok(content)
    }
}
