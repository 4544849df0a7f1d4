//! The stage definition seam.

use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

use crate::core::{ChapterSpec, GenerationParams, OutlineArtifact, ParsedArtifact, SettingsArtifact, StageKind};
use crate::errors::ValidationError;

/// How a stage's model response is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// JSON, recovered by the structured parser.
    Structured,
    /// Free prose, taken verbatim.
    Prose,
}

/// A model response after format handling.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResponse {
    /// Parsed structured value.
    Structured(Value),
    /// Raw prose.
    Prose(String),
}

/// Upstream artifacts available to a stage.
///
/// Cloning is cheap; artifacts are shared behind `Arc`s.
#[derive(Debug, Clone)]
pub struct StageInputs {
    /// Variant parameters.
    pub params: Arc<GenerationParams>,
    /// Settings, once the settings stage succeeded.
    pub settings: Option<Arc<SettingsArtifact>>,
    /// Outline, once the outline stage succeeded.
    pub outline: Option<Arc<OutlineArtifact>>,
    /// The chapter this unit generates.
    pub chapter: Option<ChapterSpec>,
}

impl StageInputs {
    /// Inputs with only parameters.
    #[must_use]
    pub fn new(params: Arc<GenerationParams>) -> Self {
        Self {
            params,
            settings: None,
            outline: None,
            chapter: None,
        }
    }

    /// Adds the settings artifact.
    #[must_use]
    pub fn with_settings(mut self, settings: Arc<SettingsArtifact>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Adds the outline artifact.
    #[must_use]
    pub fn with_outline(mut self, outline: Arc<OutlineArtifact>) -> Self {
        self.outline = Some(outline);
        self
    }

    /// Selects the chapter for a fan-out unit.
    #[must_use]
    pub fn for_chapter(&self, chapter: ChapterSpec) -> Self {
        Self {
            chapter: Some(chapter),
            ..self.clone()
        }
    }

    /// Settings, or a validation error naming `stage`.
    pub(crate) fn require_settings(&self, stage: StageKind) -> Result<&SettingsArtifact, ValidationError> {
        self.settings
            .as_deref()
            .ok_or_else(|| ValidationError::new(stage, "settings artifact is missing"))
    }

    /// Unit index for fan-out stages.
    #[must_use]
    pub fn unit(&self) -> Option<usize> {
        self.chapter.as_ref().map(|c| c.index)
    }
}

/// One step of the generation pipeline that calls the model.
///
/// A definition is pure: it renders a prompt from upstream artifacts and
/// checks the model's answer against its schema. Calling, timing out and
/// parsing are handled by [`StageRunner`](super::StageRunner).
pub trait StageDefinition: Send + Sync + Debug {
    /// Which stage this is.
    fn kind(&self) -> StageKind;

    /// How to interpret the response.
    fn response_format(&self) -> ResponseFormat {
        ResponseFormat::Structured
    }

    /// Renders the prompt.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when a required upstream artifact is missing.
    fn build_prompt(&self, inputs: &StageInputs) -> Result<String, ValidationError>;

    /// Validates the response into a typed artifact.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the response does not match the schema.
    fn validate(&self, response: StageResponse, inputs: &StageInputs) -> Result<ParsedArtifact, ValidationError>;
}

/// Renders the variant parameters as prompt lines.
pub(crate) fn describe_params(params: &GenerationParams) -> String {
    let mut lines = vec![
        format!("Genre: {}", params.genre),
        format!("Perspective: {} person", params.perspective),
    ];
    if !params.premise.trim().is_empty() {
        lines.push(format!("Premise: {}", params.premise.trim()));
    }
    if !params.tropes.is_empty() {
        lines.push(format!("Required tropes: {}", params.tropes.join(", ")));
    }
    for (key, value) in &params.extra {
        match value {
            Value::String(s) => lines.push(format!("{key}: {s}")),
            other => lines.push(format!("{key}: {other}")),
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_params_includes_extras() {
        let mut params = GenerationParams {
            premise: "A broadcaster fakes her death".to_string(),
            tropes: vec!["revenge".to_string(), "hidden identity".to_string()],
            ..GenerationParams::default()
        };
        params.extra.insert("setting".to_string(), json!("Macau, 1990s"));

        let text = describe_params(&params);

        assert!(text.contains("Genre: romance"));
        assert!(text.contains("Premise: A broadcaster fakes her death"));
        assert!(text.contains("Required tropes: revenge, hidden identity"));
        assert!(text.contains("setting: Macau, 1990s"));
    }

    #[test]
    fn test_for_chapter_keeps_upstream() {
        let inputs = StageInputs::new(Arc::new(GenerationParams::default())).with_settings(Arc::new(SettingsArtifact {
            title: "T".to_string(),
            summary: "S".to_string(),
            characters: vec![],
        }));
        let unit = inputs.for_chapter(ChapterSpec {
            index: 4,
            title: "Four".to_string(),
            summary: "s".to_string(),
            target_length: 100,
        });
        assert_eq!(unit.unit(), Some(4));
        assert!(unit.settings.is_some());
        assert_eq!(inputs.unit(), None);
    }
}
