//! Typed artifacts produced by each stage.

use serde::{Deserialize, Serialize};

use super::StageKind;

/// A character entry in the story settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    /// Character name.
    pub name: String,
    /// Narrative role (protagonist, rival, ...).
    #[serde(default)]
    pub role: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
}

/// Output of the settings stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsArtifact {
    /// Story title.
    pub title: String,
    /// One-paragraph story summary.
    pub summary: String,
    /// Main cast.
    #[serde(default)]
    pub characters: Vec<CharacterProfile>,
}

/// One planned chapter in the outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSpec {
    /// 1-based position in the outline.
    pub index: usize,
    /// Chapter title.
    pub title: String,
    /// What happens in the chapter.
    pub summary: String,
    /// Target length in characters.
    pub target_length: usize,
}

/// Output of the outline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineArtifact {
    /// Ordered chapter plan; never empty once validated.
    pub chapters: Vec<ChapterSpec>,
}

impl OutlineArtifact {
    /// Finds a chapter spec by its index.
    #[must_use]
    pub fn chapter(&self, index: usize) -> Option<&ChapterSpec> {
        self.chapters.iter().find(|c| c.index == index)
    }
}

/// One generated chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterArtifact {
    /// Index of the outline entry this chapter realizes.
    pub index: usize,
    /// Chapter title, taken from the outline.
    pub title: String,
    /// Chapter prose.
    pub body: String,
    /// Body length in characters.
    pub length: usize,
}

impl ChapterArtifact {
    /// Creates a chapter, measuring the body in characters.
    #[must_use]
    pub fn new(index: usize, title: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            index,
            title: title.into(),
            length: body.chars().count(),
            body,
        }
    }
}

/// The merged manuscript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledArtifact {
    /// Story title from the settings.
    pub title: String,
    /// Story summary from the settings.
    pub summary: String,
    /// Generated chapters in outline order.
    pub chapters: Vec<ChapterArtifact>,
    /// Sum of chapter lengths.
    pub total_length: usize,
    /// Outline indices with no generated chapter.
    pub missing_chapters: Vec<usize>,
}

impl AssembledArtifact {
    /// Renders the manuscript as plain text with chapter headings.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = format!("{}\n\n", self.title);
        for chapter in &self.chapters {
            out.push_str(&format!("Chapter {}: {}\n\n{}\n\n", chapter.index, chapter.title, chapter.body));
        }
        out.truncate(out.trim_end().len());
        out
    }
}

/// A validated stage output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedArtifact {
    /// Settings stage output.
    Settings(SettingsArtifact),
    /// Outline stage output.
    Outline(OutlineArtifact),
    /// Chapter unit output.
    Chapter(ChapterArtifact),
    /// Assembly output.
    Assembled(AssembledArtifact),
}

impl ParsedArtifact {
    /// Returns the stage that produces this kind of artifact.
    #[must_use]
    pub fn stage(&self) -> StageKind {
        match self {
            Self::Settings(_) => StageKind::Settings,
            Self::Outline(_) => StageKind::Outline,
            Self::Chapter(_) => StageKind::Chapter,
            Self::Assembled(_) => StageKind::Assembly,
        }
    }

    /// Extracts a settings artifact.
    #[must_use]
    pub fn into_settings(self) -> Option<SettingsArtifact> {
        match self {
            Self::Settings(s) => Some(s),
            _ => None,
        }
    }

    /// Extracts an outline artifact.
    #[must_use]
    pub fn into_outline(self) -> Option<OutlineArtifact> {
        match self {
            Self::Outline(o) => Some(o),
            _ => None,
        }
    }

    /// Extracts a chapter artifact.
    #[must_use]
    pub fn into_chapter(self) -> Option<ChapterArtifact> {
        match self {
            Self::Chapter(c) => Some(c),
            _ => None,
        }
    }
}
