//! Generator configuration.
//!
//! Loaded from JSON or from `NOVELFLOW_*` environment variables. Every field
//! has a default, so an empty document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::core::StageKind;
use crate::errors::ConfigError;
use crate::pipeline::RetryConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "NOVELFLOW_";

fn default_pipeline_pool_width() -> usize {
    3
}

fn default_fan_out_width() -> usize {
    5
}

fn default_call_timeout_seconds() -> u64 {
    120
}

fn default_preview_limit() -> usize {
    crate::parsing::DEFAULT_PREVIEW_LIMIT
}

fn default_chapter_length() -> usize {
    2000
}

fn default_estimated_task_minutes() -> u64 {
    5
}

fn default_event_queue_size() -> usize {
    1024
}

fn default_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_settings_call() -> StageCallConfig {
    StageCallConfig {
        temperature: 0.8,
        max_tokens: 2000,
    }
}

fn default_outline_call() -> StageCallConfig {
    StageCallConfig {
        temperature: 0.7,
        max_tokens: 3000,
    }
}

fn default_chapter_call() -> StageCallConfig {
    StageCallConfig {
        temperature: 0.85,
        max_tokens: 4000,
    }
}

/// Sampling options for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageCallConfig {
    /// Sampling temperature.
    pub temperature: f32,
    /// Token limit.
    pub max_tokens: u32,
}

/// Remote completion endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Bearer token.
    #[serde(default)]
    pub api_key: String,
    /// Base URL; `/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
        }
    }
}

/// Top-level configuration for pipelines and batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Pipelines run concurrently per batch.
    #[serde(default = "default_pipeline_pool_width")]
    pub pipeline_pool_width: usize,
    /// Chapter units run concurrently per pipeline.
    #[serde(default = "default_fan_out_width")]
    pub fan_out_width: usize,
    /// Per-call deadline in seconds.
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
    /// Retry policy for the settings and outline stages.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Characters kept in raw-response previews.
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
    /// Settings stage sampling.
    #[serde(default = "default_settings_call")]
    pub settings: StageCallConfig,
    /// Outline stage sampling.
    #[serde(default = "default_outline_call")]
    pub outline: StageCallConfig,
    /// Chapter stage sampling.
    #[serde(default = "default_chapter_call")]
    pub chapter: StageCallConfig,
    /// Chapter length used when neither outline nor parameters give one.
    #[serde(default = "default_chapter_length")]
    pub default_chapter_length: usize,
    /// Rough minutes per task, for batch completion estimates.
    #[serde(default = "default_estimated_task_minutes")]
    pub estimated_task_minutes: u64,
    /// Capacity of channel-backed event sinks.
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
    /// Completion endpoint.
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            pipeline_pool_width: default_pipeline_pool_width(),
            fan_out_width: default_fan_out_width(),
            call_timeout_seconds: default_call_timeout_seconds(),
            retry: RetryConfig::default(),
            preview_limit: default_preview_limit(),
            settings: default_settings_call(),
            outline: default_outline_call(),
            chapter: default_chapter_call(),
            default_chapter_length: default_chapter_length(),
            estimated_task_minutes: default_estimated_task_minutes(),
            event_queue_size: default_event_queue_size(),
            provider: ProviderConfig::default(),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, ConfigError> {
    let var = format!("{ENV_PREFIX}{name}");
    match lookup(&var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvVar { var, value }),
    }
}

impl GeneratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] for malformed JSON and the validation
    /// error for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when the file cannot be read or decoded.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Reads `NOVELFLOW_*` environment variables over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvVar`] for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvVar`] for unparseable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "PIPELINE_POOL_WIDTH")? {
            config.pipeline_pool_width = v;
        }
        if let Some(v) = parse_var(&lookup, "FAN_OUT_WIDTH")? {
            config.fan_out_width = v;
        }
        if let Some(v) = parse_var(&lookup, "CALL_TIMEOUT_SECONDS")? {
            config.call_timeout_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, "RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PREVIEW_LIMIT")? {
            config.preview_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "DEFAULT_CHAPTER_LENGTH")? {
            config.default_chapter_length = v;
        }
        if let Some(v) = parse_var(&lookup, "ESTIMATED_TASK_MINUTES")? {
            config.estimated_task_minutes = v;
        }
        if let Some(v) = parse_var(&lookup, "API_KEY")? {
            config.provider.api_key = v;
        }
        if let Some(v) = parse_var(&lookup, "BASE_URL")? {
            config.provider.base_url = v;
        }
        if let Some(v) = parse_var(&lookup, "MODEL")? {
            config.provider.model = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline_pool_width == 0 {
            return Err(ConfigError::invalid_value("pipeline_pool_width", "must be at least 1"));
        }
        if self.fan_out_width == 0 {
            return Err(ConfigError::invalid_value("fan_out_width", "must be at least 1"));
        }
        if self.call_timeout_seconds == 0 {
            return Err(ConfigError::invalid_value("call_timeout_seconds", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid_value("retry.max_attempts", "must be at least 1"));
        }
        if self.preview_limit == 0 {
            return Err(ConfigError::invalid_value("preview_limit", "must be at least 1"));
        }
        for (name, call) in [("settings", self.settings), ("outline", self.outline), ("chapter", self.chapter)] {
            if !(0.0..=2.0).contains(&call.temperature) {
                return Err(ConfigError::invalid_value(
                    format!("{name}.temperature"),
                    "must be between 0.0 and 2.0",
                ));
            }
            if call.max_tokens == 0 {
                return Err(ConfigError::invalid_value(format!("{name}.max_tokens"), "must be positive"));
            }
        }
        Ok(())
    }

    /// Per-call deadline.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    /// Estimated duration of one task.
    #[must_use]
    pub fn per_task_estimate(&self) -> Duration {
        Duration::from_secs(self.estimated_task_minutes.saturating_mul(60))
    }

    /// Sampling options for a stage. Assembly makes no call and reuses the
    /// chapter options.
    #[must_use]
    pub fn call_options(&self, stage: StageKind) -> StageCallConfig {
        match stage {
            StageKind::Settings => self.settings,
            StageKind::Outline => self.outline,
            StageKind::Chapter | StageKind::Assembly => self.chapter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.pipeline_pool_width, 3);
        assert_eq!(config.fan_out_width, 5);
        assert_eq!(config.call_timeout(), Duration::from_secs(120));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.preview_limit, 500);
        assert_eq!(config.chapter.max_tokens, 4000);
        assert_eq!(config.provider.model, "deepseek-chat");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_is_default() {
        let config = GeneratorConfig::from_json_str("{}").unwrap();
        assert_eq!(config, GeneratorConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config = GeneratorConfig::from_json_str(
            r#"{"fan_out_width": 2, "retry": {"max_attempts": 5}, "provider": {"model": "glm-4"}}"#,
        )
        .unwrap();
        assert_eq!(config.fan_out_width, 2);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.provider.model, "glm-4");
        assert_eq!(config.provider.base_url, "https://api.deepseek.com");
    }

    #[test]
    fn test_invalid_json_value_rejected() {
        let err = GeneratorConfig::from_json_str(r#"{"pipeline_pool_width": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "pipeline_pool_width"));

        let err = GeneratorConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_temperature_range() {
        let mut config = GeneratorConfig::default();
        config.chapter.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("NOVELFLOW_FAN_OUT_WIDTH", "8"),
            ("NOVELFLOW_API_KEY", "sk-123"),
            ("NOVELFLOW_CALL_TIMEOUT_SECONDS", " 30 "),
        ]);
        let config = GeneratorConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.fan_out_width, 8);
        assert_eq!(config.provider.api_key, "sk-123");
        assert_eq!(config.call_timeout_seconds, 30);
        assert_eq!(config.pipeline_pool_width, 3);
    }

    #[test]
    fn test_from_lookup_bad_value() {
        let err = GeneratorConfig::from_lookup(|k| (k == "NOVELFLOW_FAN_OUT_WIDTH").then(|| "wide".to_string()))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::EnvVar {
                var: "NOVELFLOW_FAN_OUT_WIDTH".to_string(),
                value: "wide".to_string()
            }
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pipeline_pool_width": 2, "estimated_task_minutes": 10}}"#).unwrap();

        let config = GeneratorConfig::from_file(file.path()).unwrap();

        assert_eq!(config.pipeline_pool_width, 2);
        assert_eq!(config.per_task_estimate(), Duration::from_secs(600));
    }

    #[test]
    fn test_from_missing_file() {
        let err = GeneratorConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_call_options() {
        let config = GeneratorConfig::default();
        assert!((config.call_options(StageKind::Chapter).temperature - 0.85).abs() < f32::EPSILON);
        assert!((config.call_options(StageKind::Settings).temperature - 0.8).abs() < f32::EPSILON);
    }
}
