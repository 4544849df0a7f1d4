//! Executes one stage attempt: prompt, call, parse, validate.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::definition::{ResponseFormat, StageDefinition, StageInputs, StageResponse};
use crate::completion::{CompletionFn, CompletionRequest};
use crate::config::GeneratorConfig;
use crate::core::{RawModelResponse, StageFailure, StageResult};
use crate::errors::CallError;
use crate::parsing::StructuredResponseParser;

/// Runs a single stage attempt and never retries.
///
/// Holds only shared handles, so one runner serves every concurrent unit of
/// a pipeline.
#[derive(Clone)]
pub struct StageRunner {
    completion: Arc<dyn CompletionFn>,
    parser: StructuredResponseParser,
    config: Arc<GeneratorConfig>,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("parser", &self.parser)
            .field("call_timeout", &self.call_timeout())
            .finish_non_exhaustive()
    }
}

impl StageRunner {
    /// Creates a runner over the given completion function.
    #[must_use]
    pub fn new(completion: Arc<dyn CompletionFn>, config: Arc<GeneratorConfig>) -> Self {
        let parser = StructuredResponseParser::new().with_preview_limit(config.preview_limit);
        Self {
            completion,
            parser,
            config,
        }
    }

    /// The per-call deadline.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.config.call_timeout()
    }

    /// Runs `definition` once.
    ///
    /// `attempt` is 1-based and only recorded on failures.
    pub async fn run(&self, definition: &dyn StageDefinition, inputs: &StageInputs, attempt: u32) -> StageResult {
        let stage = definition.kind();
        let unit = inputs.unit();
        let tag = |failure: StageFailure| {
            let failure = failure.with_attempt(attempt);
            match unit {
                Some(index) => failure.with_unit(index),
                None => failure,
            }
        };

        let prompt = match definition.build_prompt(inputs) {
            Ok(prompt) => prompt,
            Err(e) => return StageResult::Failure(tag(StageFailure::from_validation(&e))),
        };

        let options = self.config.call_options(stage);
        let timeout = self.call_timeout();
        let request = CompletionRequest::new(stage, prompt)
            .with_temperature(options.temperature)
            .with_max_tokens(options.max_tokens)
            .with_timeout(timeout)
            .with_unit(unit);

        let called = tokio::time::timeout(timeout, self.completion.complete(&request)).await;
        let text = match called {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(stage = %stage, unit = ?unit, attempt, error = %e, "Completion call failed");
                return StageResult::Failure(tag(StageFailure::from_call(stage, &e)));
            }
            Err(_) => {
                let e = CallError::timeout(timeout);
                warn!(stage = %stage, unit = ?unit, attempt, error = %e, "Completion call timed out");
                return StageResult::Failure(tag(StageFailure::from_call(stage, &e)));
            }
        };
        let raw = RawModelResponse::new(text, stage, attempt);

        let response = match definition.response_format() {
            ResponseFormat::Prose => StageResponse::Prose(raw.text.clone()),
            ResponseFormat::Structured => match self.parser.parse(&raw.text) {
                Ok(outcome) => {
                    debug!(stage = %stage, pass = %outcome.pass, "Parsed stage response");
                    StageResponse::Structured(outcome.value)
                }
                Err(e) => {
                    warn!(stage = %stage, unit = ?unit, attempt, error = %e, "Stage response unparseable");
                    return StageResult::Failure(tag(StageFailure::from_parse(stage, &e)));
                }
            },
        };

        match definition.validate(response, inputs) {
            Ok(artifact) => StageResult::Success(artifact),
            Err(e) => {
                warn!(stage = %stage, unit = ?unit, attempt, error = %e, "Stage response failed validation");
                StageResult::Failure(tag(
                    StageFailure::from_validation(&e).with_raw_preview(raw.preview(self.parser.preview_limit())),
                ))
            }
        }
    }
}
