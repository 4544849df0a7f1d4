//! Assembly: merges chapters into the manuscript. No model call.

use std::collections::HashMap;

use crate::core::{AssembledArtifact, ChapterArtifact, OutlineArtifact, SettingsArtifact, StageKind};
use crate::errors::ValidationError;

/// Orders `chapters` by ascending chapter index and records outline entries with no
/// chapter as gaps.
///
/// # Errors
///
/// Fails when settings or outline are missing, when there are no chapters,
/// or when a chapter index is unknown to the outline or appears twice.
pub fn assemble(
    settings: Option<&SettingsArtifact>,
    outline: Option<&OutlineArtifact>,
    chapters: &[ChapterArtifact],
) -> Result<AssembledArtifact, ValidationError> {
    let settings = settings.ok_or_else(|| ValidationError::new(StageKind::Assembly, "settings artifact is missing"))?;
    let outline = outline.ok_or_else(|| ValidationError::new(StageKind::Assembly, "outline artifact is missing"))?;
    if chapters.is_empty() {
        return Err(ValidationError::new(StageKind::Assembly, "no chapters to assemble"));
    }

    let mut by_index: HashMap<usize, &ChapterArtifact> = HashMap::with_capacity(chapters.len());
    for chapter in chapters {
        if outline.chapter(chapter.index).is_none() {
            return Err(ValidationError::new(
                StageKind::Assembly,
                format!("chapter {} is not in the outline", chapter.index),
            ));
        }
        if by_index.insert(chapter.index, chapter).is_some() {
            return Err(ValidationError::new(
                StageKind::Assembly,
                format!("chapter {} appears more than once", chapter.index),
            ));
        }
    }

    let mut ordered = Vec::with_capacity(chapters.len());
    let mut missing_chapters = Vec::new();
    let mut planned: Vec<usize> = outline.chapters.iter().map(|spec| spec.index).collect();
    planned.sort_unstable();
    for index in planned {
        match by_index.get(&index) {
            Some(chapter) => ordered.push((*chapter).clone()),
            None => missing_chapters.push(index),
        }
    }

    Ok(AssembledArtifact {
        title: settings.title.clone(),
        summary: settings.summary.clone(),
        total_length: ordered.iter().map(|c| c.length).sum(),
        chapters: ordered,
        missing_chapters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChapterSpec;
    use pretty_assertions::assert_eq;

    fn settings() -> SettingsArtifact {
        SettingsArtifact {
            title: "Tide".to_string(),
            summary: "s".to_string(),
            characters: vec![],
        }
    }

    fn outline(n: usize) -> OutlineArtifact {
        OutlineArtifact {
            chapters: (1..=n)
                .map(|index| ChapterSpec {
                    index,
                    title: format!("C{index}"),
                    summary: "x".to_string(),
                    target_length: 10,
                })
                .collect(),
        }
    }

    fn chapter(index: usize) -> ChapterArtifact {
        ChapterArtifact::new(index, format!("C{index}"), "abcd")
    }

    #[test]
    fn test_orders_and_records_gaps() {
        let assembled = assemble(Some(&settings()), Some(&outline(4)), &[chapter(4), chapter(1), chapter(2)]).unwrap();

        let indices: Vec<usize> = assembled.chapters.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 2, 4]);
        assert_eq!(assembled.missing_chapters, vec![3]);
        assert_eq!(assembled.total_length, 12);
        assert_eq!(assembled.title, "Tide");
    }

    #[test]
    fn test_unsorted_outline_assembles_in_index_order() {
        let mut plan = outline(3);
        plan.chapters.reverse();

        let assembled = assemble(Some(&settings()), Some(&plan), &[chapter(3), chapter(1)]).unwrap();

        let indices: Vec<usize> = assembled.chapters.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(assembled.missing_chapters, vec![2]);
    }

    #[test]
    fn test_rejects_unknown_and_duplicate() {
        assert!(assemble(Some(&settings()), Some(&outline(2)), &[chapter(5)]).is_err());
        let err = assemble(Some(&settings()), Some(&outline(2)), &[chapter(1), chapter(1)]).unwrap_err();
        assert!(err.message.contains("more than once"));
    }

    #[test]
    fn test_rejects_missing_inputs() {
        assert!(assemble(None, Some(&outline(1)), &[chapter(1)]).is_err());
        assert!(assemble(Some(&settings()), None, &[chapter(1)]).is_err());
        let err = assemble(Some(&settings()), Some(&outline(1)), &[]).unwrap_err();
        assert_eq!(err.stage, StageKind::Assembly);
    }
}
