//! Settings stage: title, summary and main cast.

use serde::Deserialize;

use super::definition::{describe_params, StageDefinition, StageInputs, StageResponse};
use crate::core::{CharacterProfile, ParsedArtifact, SettingsArtifact, StageKind};
use crate::errors::ValidationError;

#[derive(Deserialize)]
struct RawSettings {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "logline")]
    summary: Option<String>,
    #[serde(default)]
    characters: Vec<RawCharacter>,
}

#[derive(Deserialize)]
struct RawCharacter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Generates the story settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsStage;

impl StageDefinition for SettingsStage {
    fn kind(&self) -> StageKind {
        StageKind::Settings
    }

    fn build_prompt(&self, inputs: &StageInputs) -> Result<String, ValidationError> {
        let params = &inputs.params;
        Ok(format!(
            "Create the settings for a serialized novel.\n\n\
             {}\n\
             Target length: about {} characters over {} chapters.\n\n\
             Respond with JSON only, in this shape:\n\
             {{\"title\": \"an attention-grabbing title\", \"summary\": \"one paragraph\", \
             \"characters\": [{{\"name\": \"...\", \"role\": \"protagonist|supporting\", \"description\": \"...\"}}]}}",
            describe_params(params),
            params.target_words,
            params.chapter_count,
        ))
    }

    fn validate(&self, response: StageResponse, _inputs: &StageInputs) -> Result<ParsedArtifact, ValidationError> {
        let StageResponse::Structured(value) = response else {
            return Err(ValidationError::new(StageKind::Settings, "expected a structured response"));
        };
        let raw: RawSettings = serde_json::from_value(value)
            .map_err(|e| ValidationError::new(StageKind::Settings, format!("unexpected shape: {e}")))?;

        let title = non_empty(raw.title).ok_or_else(|| ValidationError::new(StageKind::Settings, "title is empty"))?;
        let summary =
            non_empty(raw.summary).ok_or_else(|| ValidationError::new(StageKind::Settings, "summary is empty"))?;

        let characters = raw
            .characters
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let name = non_empty(c.name)
                    .ok_or_else(|| ValidationError::new(StageKind::Settings, format!("character {} has no name", i + 1)))?;
                Ok(CharacterProfile {
                    name,
                    role: c.role.unwrap_or_default(),
                    description: c.description.unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Ok(ParsedArtifact::Settings(SettingsArtifact {
            title,
            summary,
            characters,
        }))
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
