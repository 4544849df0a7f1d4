//! Outline stage: the chapter plan, ordered by chapter index.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::warn;

use super::definition::{describe_params, StageDefinition, StageInputs, StageResponse};
use super::settings::non_empty;
use crate::core::{ChapterSpec, OutlineArtifact, ParsedArtifact, StageKind};
use crate::errors::ValidationError;

#[derive(Deserialize)]
struct RawOutline {
    #[serde(alias = "key_scenes")]
    chapters: Vec<RawChapter>,
}

#[derive(Deserialize)]
struct RawChapter {
    #[serde(default, alias = "chapter")]
    index: Option<usize>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    target_length: Option<usize>,
    #[serde(default, alias = "targetWords")]
    target_words: Option<usize>,
}

/// Generates the chapter outline.
#[derive(Debug, Clone, Copy)]
pub struct OutlineStage {
    default_chapter_length: usize,
}

impl OutlineStage {
    /// Creates the stage with the configured fallback chapter length.
    #[must_use]
    pub fn new(default_chapter_length: usize) -> Self {
        Self { default_chapter_length }
    }
}

impl StageDefinition for OutlineStage {
    fn kind(&self) -> StageKind {
        StageKind::Outline
    }

    fn build_prompt(&self, inputs: &StageInputs) -> Result<String, ValidationError> {
        let settings = inputs.require_settings(StageKind::Outline)?;
        let params = &inputs.params;
        let cast = settings
            .characters
            .iter()
            .map(|c| format!("- {} ({}): {}", c.name, c.role, c.description))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(format!(
            "Write a chapter outline for the novel \"{}\".\n\n\
             Summary: {}\n\
             Characters:\n{}\n\n\
             {}\n\
             Plan exactly {} chapters of about {} characters each. Every chapter needs a \
             title and a summary of what happens.\n\n\
             Respond with JSON only, in this shape:\n\
             {{\"chapters\": [{{\"index\": 1, \"title\": \"...\", \"summary\": \"...\", \"target_length\": {}}}]}}",
            settings.title,
            settings.summary,
            cast,
            describe_params(params),
            params.chapter_count,
            params.default_chapter_length(),
            params.default_chapter_length(),
        ))
    }

    fn validate(&self, response: StageResponse, inputs: &StageInputs) -> Result<ParsedArtifact, ValidationError> {
        let StageResponse::Structured(value) = response else {
            return Err(ValidationError::new(StageKind::Outline, "expected a structured response"));
        };
        let value = match value {
            Value::Array(items) => json!({ "chapters": items }),
            other => other,
        };
        let raw: RawOutline = serde_json::from_value(value)
            .map_err(|e| ValidationError::new(StageKind::Outline, format!("unexpected shape: {e}")))?;

        let fallback_length = match inputs.params.default_chapter_length() {
            0 => self.default_chapter_length,
            n => n,
        };

        let mut seen = HashSet::new();
        let mut chapters = Vec::with_capacity(raw.chapters.len());
        for (position, chapter) in raw.chapters.into_iter().enumerate() {
            let index = chapter.index.unwrap_or(position + 1);
            let Some(summary) = non_empty(chapter.summary) else {
                warn!(chapter = index, "Dropping outline chapter without summary");
                continue;
            };
            if !seen.insert(index) {
                return Err(ValidationError::new(
                    StageKind::Outline,
                    format!("duplicate chapter index {index}"),
                ));
            }
            chapters.push(ChapterSpec {
                index,
                title: non_empty(chapter.title).unwrap_or_else(|| format!("Chapter {index}")),
                summary,
                target_length: chapter
                    .target_length
                    .or(chapter.target_words)
                    .filter(|n| *n > 0)
                    .unwrap_or(fallback_length),
            });
        }

        if chapters.is_empty() {
            return Err(ValidationError::new(StageKind::Outline, "chapter list is empty"));
        }
        chapters.sort_by_key(|c| c.index);
        Ok(ParsedArtifact::Outline(OutlineArtifact { chapters }))
    }
}
