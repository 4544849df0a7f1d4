//! Batch requests and their up-front validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::GenerationParams;
use crate::errors::ConfigError;

/// A named batch: shared base parameters plus one overlay per variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Batch name.
    pub name: String,
    /// Parameters shared by every variant.
    #[serde(default)]
    pub base: Map<String, Value>,
    /// Per-variant overlays; keys win over `base`.
    #[serde(default)]
    pub variants: Vec<Map<String, Value>>,
}

impl BatchRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the base parameters.
    #[must_use]
    pub fn with_base(mut self, base: Map<String, Value>) -> Self {
        self.base = base;
        self
    }

    /// Adds a variant overlay.
    #[must_use]
    pub fn with_variant(mut self, overlay: Map<String, Value>) -> Self {
        self.variants.push(overlay);
        self
    }

    /// Adds `count` variants with no overrides.
    #[must_use]
    pub fn with_copies(mut self, count: usize) -> Self {
        self.variants.extend(std::iter::repeat_with(Map::new).take(count));
        self
    }

    /// Merges every variant over the base and checks it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoVariants`] for an empty variant list,
    /// [`ConfigError::InvalidParameters`] when a merged map does not describe
    /// valid parameters, and [`ConfigError::EmptyChapterList`] when a variant
    /// asks for zero chapters.
    pub fn resolve(&self) -> Result<Vec<GenerationParams>, ConfigError> {
        if self.variants.is_empty() {
            return Err(ConfigError::NoVariants {
                batch: self.name.clone(),
            });
        }
        self.variants
            .iter()
            .enumerate()
            .map(|(variant, overlay)| {
                let params = GenerationParams::from_overlay(&self.base, overlay)
                    .map_err(|message| ConfigError::InvalidParameters { variant, message })?;
                if params.chapter_count == 0 {
                    return Err(ConfigError::EmptyChapterList { variant });
                }
                Ok(params)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::params_map;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_resolve_merges_overlays() {
        let request = BatchRequest::new("nightly")
            .with_base(params_map(json!({"genre": "romance", "chapterCount": 5})))
            .with_variant(params_map(json!({"perspective": "third"})))
            .with_variant(params_map(json!({"genre": "mystery", "chapterCount": 3})));

        let params = request.resolve().unwrap();

        assert_eq!(params.len(), 2);
        assert_eq!(params[0].perspective, "third");
        assert_eq!(params[0].chapter_count, 5);
        assert_eq!(params[1].genre, "mystery");
        assert_eq!(params[1].chapter_count, 3);
    }

    #[test]
    fn test_mixed_key_spellings_resolve() {
        let request = BatchRequest::new("mixed")
            .with_base(params_map(json!({"chapterCount": 5})))
            .with_variant(params_map(json!({"chapter_count": 3})))
            .with_variant(params_map(json!({"genre": "noir"})));

        let params = request.resolve().unwrap();

        assert_eq!(params[0].chapter_count, 3);
        assert_eq!(params[1].chapter_count, 5);
    }

    #[test]
    fn test_no_variants_rejected() {
        let err = BatchRequest::new("empty").resolve().unwrap_err();
        assert_eq!(
            err,
            ConfigError::NoVariants {
                batch: "empty".to_string()
            }
        );
    }

    #[test]
    fn test_zero_chapters_rejected() {
        let request = BatchRequest::new("b")
            .with_copies(1)
            .with_variant(params_map(json!({"chapter_count": 0})));
        assert_eq!(request.resolve().unwrap_err(), ConfigError::EmptyChapterList { variant: 1 });
    }

    #[test]
    fn test_bad_parameter_type_rejected() {
        let request = BatchRequest::new("b").with_variant(params_map(json!({"chapterCount": "eight"})));
        assert!(matches!(
            request.resolve().unwrap_err(),
            ConfigError::InvalidParameters { variant: 0, .. }
        ));
    }

    #[test]
    fn test_request_deserializes() {
        let request: BatchRequest =
            serde_json::from_str(r#"{"name": "n", "variants": [{"genre": "wuxia"}]}"#).unwrap();
        assert_eq!(request.resolve().unwrap()[0].genre, "wuxia");
    }
}
