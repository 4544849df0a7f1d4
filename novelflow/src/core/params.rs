//! Typed generation parameters for one variant.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Accepted alternate spellings and the field each one names.
const KEY_ALIASES: [(&str, &str); 3] = [
    ("summary", "premise"),
    ("targetWords", "target_words"),
    ("chapterCount", "chapter_count"),
];

fn canonical_key(key: &str) -> &str {
    KEY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map_or(key, |(_, field)| *field)
}

fn default_genre() -> String {
    "romance".to_string()
}

fn default_perspective() -> String {
    "first".to_string()
}

fn default_target_words() -> usize {
    22_000
}

fn default_chapter_count() -> usize {
    8
}

/// Parameters that drive one generation pipeline.
///
/// A variant is produced by overlaying a per-variant map on a shared base map;
/// keys in the overlay win. Unknown keys are preserved in `extra` and rendered
/// into prompts verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Story genre.
    #[serde(default = "default_genre")]
    pub genre: String,

    /// Narrative perspective (e.g. "first", "third").
    #[serde(default = "default_perspective")]
    pub perspective: String,

    /// Free-form premise or summary supplied by the caller.
    #[serde(default, alias = "summary")]
    pub premise: String,

    /// Total target length across all chapters, in characters.
    #[serde(default = "default_target_words", alias = "targetWords")]
    pub target_words: usize,

    /// Requested number of chapters.
    #[serde(default = "default_chapter_count", alias = "chapterCount")]
    pub chapter_count: usize,

    /// Story tropes the outline should include.
    #[serde(default)]
    pub tropes: Vec<String>,

    /// Any other keys from the base or overlay.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            genre: default_genre(),
            perspective: default_perspective(),
            premise: String::new(),
            target_words: default_target_words(),
            chapter_count: default_chapter_count(),
            tropes: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl GenerationParams {
    /// Merges `overlay` on top of `base` and deserializes the result.
    ///
    /// Alternate spellings such as `chapterCount` are folded onto their field
    /// name first, so an overlay wins whichever spelling either side uses.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error message when the merged map does not
    /// describe valid parameters (e.g. a string where a count is expected).
    pub fn from_overlay(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Result<Self, String> {
        let mut merged = Map::with_capacity(base.len() + overlay.len());
        for (key, value) in base.iter().chain(overlay) {
            merged.insert(canonical_key(key).to_string(), value.clone());
        }
        serde_json::from_value(Value::Object(merged)).map_err(|e| e.to_string())
    }

    /// Per-chapter length used when the outline does not state one.
    #[must_use]
    pub fn default_chapter_length(&self) -> usize {
        self.target_words / self.chapter_count.max(1)
    }

    /// Short human-readable label, used for task names.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} / {} person", self.genre, self.perspective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_overlay_wins_over_base() {
        let base = as_map(json!({"genre": "romance", "chapterCount": 6, "tone": "bitter"}));
        let overlay = as_map(json!({"genre": "mystery"}));

        let params = GenerationParams::from_overlay(&base, &overlay).unwrap();

        assert_eq!(params.genre, "mystery");
        assert_eq!(params.chapter_count, 6);
        assert_eq!(params.extra.get("tone"), Some(&json!("bitter")));
    }

    #[test]
    fn test_alias_spellings_fold_before_merge() {
        let base = as_map(json!({"chapterCount": 5, "summary": "old", "target_words": 9000}));
        let overlay = as_map(json!({"chapter_count": 3, "premise": "new", "targetWords": 6000}));

        let params = GenerationParams::from_overlay(&base, &overlay).unwrap();

        assert_eq!(params.chapter_count, 3);
        assert_eq!(params.premise, "new");
        assert_eq!(params.target_words, 6000);
        assert!(params.extra.is_empty());
    }

    #[test]
    fn test_defaults_applied() {
        let params = GenerationParams::from_overlay(&Map::new(), &Map::new()).unwrap();
        assert_eq!(params, GenerationParams::default());
        assert_eq!(params.default_chapter_length(), 2750);
    }

    #[test]
    fn test_invalid_type_rejected() {
        let overlay = as_map(json!({"chapter_count": "lots"}));
        assert!(GenerationParams::from_overlay(&Map::new(), &overlay).is_err());
    }

    #[test]
    fn test_zero_chapters_does_not_divide_by_zero() {
        let params = GenerationParams {
            chapter_count: 0,
            target_words: 1000,
            ..GenerationParams::default()
        };
        assert_eq!(params.default_chapter_length(), 1000);
    }
}
