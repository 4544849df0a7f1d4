//! Chapter stage: prose for one outline entry.

use super::definition::{ResponseFormat, StageDefinition, StageInputs, StageResponse};
use crate::core::{ChapterArtifact, ChapterSpec, ParsedArtifact, StageKind};
use crate::errors::ValidationError;

/// Generates one chapter. Units are independent of each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChapterStage;

fn require_chapter(inputs: &StageInputs) -> Result<&ChapterSpec, ValidationError> {
    inputs
        .chapter
        .as_ref()
        .ok_or_else(|| ValidationError::new(StageKind::Chapter, "no chapter selected for this unit"))
}

impl StageDefinition for ChapterStage {
    fn kind(&self) -> StageKind {
        StageKind::Chapter
    }

    fn response_format(&self) -> ResponseFormat {
        ResponseFormat::Prose
    }

    fn build_prompt(&self, inputs: &StageInputs) -> Result<String, ValidationError> {
        let settings = inputs.require_settings(StageKind::Chapter)?;
        let chapter = require_chapter(inputs)?;
        let cast = settings
            .characters
            .iter()
            .map(|c| format!("- {}: {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(format!(
            "Write chapter {} of the novel \"{}\".\n\n\
             Chapter title: {}\n\
             What happens: {}\n\
             Target length: about {} characters\n\n\
             Characters:\n{}\n\n\
             Genre: {}. Narrate in the {} person.\n\n\
             Write the chapter text directly, with no heading and no commentary.",
            chapter.index,
            settings.title,
            chapter.title,
            chapter.summary,
            chapter.target_length,
            cast,
            inputs.params.genre,
            inputs.params.perspective,
        ))
    }

    fn validate(&self, response: StageResponse, inputs: &StageInputs) -> Result<ParsedArtifact, ValidationError> {
        let chapter = require_chapter(inputs)?;
        let StageResponse::Prose(text) = response else {
            return Err(ValidationError::new(StageKind::Chapter, "expected a prose response"));
        };
        let body = text.trim();
        if body.is_empty() {
            return Err(ValidationError::new(
                StageKind::Chapter,
                format!("chapter {} body is empty", chapter.index),
            ));
        }
        Ok(ParsedArtifact::Chapter(ChapterArtifact::new(
            chapter.index,
            chapter.title.clone(),
            body,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GenerationParams, SettingsArtifact};
    use std::sync::Arc;

    fn inputs() -> StageInputs {
        StageInputs::new(Arc::new(GenerationParams::default()))
            .with_settings(Arc::new(SettingsArtifact {
                title: "Tide".to_string(),
                summary: "s".to_string(),
                characters: vec![],
            }))
            .for_chapter(ChapterSpec {
                index: 3,
                title: "The Funeral".to_string(),
                summary: "She walks in.".to_string(),
                target_length: 2000,
            })
    }

    #[test]
    fn test_body_trimmed_and_titled() {
        let chapter = ChapterStage
            .validate(StageResponse::Prose("\n  Rain fell.  \n".to_string()), &inputs())
            .unwrap()
            .into_chapter()
            .unwrap();
        assert_eq!(chapter.index, 3);
        assert_eq!(chapter.title, "The Funeral");
        assert_eq!(chapter.body, "Rain fell.");
        assert_eq!(chapter.length, 10);
    }

    #[test]
    fn test_whitespace_body_rejected() {
        let err = ChapterStage
            .validate(StageResponse::Prose(" \n\t ".to_string()), &inputs())
            .unwrap_err();
        assert!(err.message.contains("chapter 3"));
    }

    #[test]
    fn test_prompt_needs_unit() {
        let mut no_unit = inputs();
        no_unit.chapter = None;
        assert!(ChapterStage.build_prompt(&no_unit).is_err());
        assert!(ChapterStage.build_prompt(&inputs()).unwrap().contains("The Funeral"));
    }
}
