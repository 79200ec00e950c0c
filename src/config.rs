use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::profile::ConfigurationError;

/// Application-level constants
pub const APP_NAME: &str = "Glossa";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "glossa_lib=info,glossa=info,warn"
}

/// Get the application data directory (~/.glossa/ on all platforms).
/// Falls back to the working directory when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".glossa")
}

/// Directory searched for `<language>.json` profile files.
pub fn profiles_dir() -> PathBuf {
    app_data_dir().join("profiles")
}

/// Ollama instance used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Tuning values for the analysis pipeline.
///
/// All defaults are empirically chosen and carry no stronger meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model tried first for every call.
    pub primary_model: String,
    /// Model tried once, immediately, when the primary fails.
    pub secondary_model: String,
    /// Generation service endpoint.
    pub base_url: String,
    /// Token budget for a single-sentence call.
    pub single_max_tokens: u32,
    /// Token budget for a chunk call.
    pub batch_max_tokens: u32,
    /// Bounded wait per model call.
    #[serde(with = "duration_secs")]
    pub call_timeout: Duration,
    /// Maximum sentences per chunk call.
    pub chunk_size: usize,
    /// Attempts per chunk (and per single request) before falling back.
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt.
    #[serde(with = "duration_millis")]
    pub base_backoff: Duration,
    /// Ceiling for any single backoff delay.
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
    /// Confidence stamped on every rule-based result.
    pub fallback_confidence: f32,
    /// Generated results below this carry a `LowConfidence` issue.
    pub low_confidence_threshold: f32,
    /// Worker threads for chunk execution (1 = sequential).
    pub max_concurrent_chunks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            primary_model: "qwen2.5:7b".to_string(),
            secondary_model: "llama3.1:8b".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            single_max_tokens: 2_048,
            batch_max_tokens: 8_192,
            call_timeout: Duration::from_secs(30),
            chunk_size: 8,
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            fallback_confidence: 0.3,
            low_confidence_threshold: 0.5,
            max_concurrent_chunks: 1,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with any `GLOSSA_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup (env vars in production).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("GLOSSA_PRIMARY_MODEL") {
            self.primary_model = v;
        }
        if let Some(v) = lookup("GLOSSA_SECONDARY_MODEL") {
            self.secondary_model = v;
        }
        if let Some(v) = lookup("GLOSSA_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = parse_var(&lookup, "GLOSSA_SINGLE_MAX_TOKENS") {
            self.single_max_tokens = v;
        }
        if let Some(v) = parse_var(&lookup, "GLOSSA_BATCH_MAX_TOKENS") {
            self.batch_max_tokens = v;
        }
        if let Some(v) = parse_var(&lookup, "GLOSSA_CALL_TIMEOUT_SECS") {
            self.call_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "GLOSSA_CHUNK_SIZE") {
            self.chunk_size = v;
        }
        if let Some(v) = parse_var(&lookup, "GLOSSA_MAX_ATTEMPTS") {
            self.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "GLOSSA_BASE_BACKOFF_MS") {
            self.base_backoff = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(&lookup, "GLOSSA_MAX_BACKOFF_MS") {
            self.max_backoff = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(&lookup, "GLOSSA_FALLBACK_CONFIDENCE") {
            self.fallback_confidence = v;
        }
        if let Some(v) = parse_var(&lookup, "GLOSSA_LOW_CONFIDENCE_THRESHOLD") {
            self.low_confidence_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "GLOSSA_MAX_CONCURRENT_CHUNKS") {
            self.max_concurrent_chunks = v;
        }
        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.primary_model.trim().is_empty() || self.secondary_model.trim().is_empty() {
            return Err(ConfigurationError::InvalidPolicy(
                "primary and secondary model names must be set".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ConfigurationError::InvalidPolicy("chunk_size must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigurationError::InvalidPolicy("max_attempts must be at least 1".into()));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigurationError::InvalidPolicy("call_timeout must be positive".into()));
        }
        if self.max_concurrent_chunks == 0 {
            return Err(ConfigurationError::InvalidPolicy(
                "max_concurrent_chunks must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fallback_confidence) {
            return Err(ConfigurationError::InvalidPolicy(format!(
                "fallback_confidence {} outside [0, 1]",
                self.fallback_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.low_confidence_threshold) {
            return Err(ConfigurationError::InvalidPolicy(format!(
                "low_confidence_threshold {} outside [0, 1]",
                self.low_confidence_threshold
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable config override");
            None
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn profiles_dir_under_app_data() {
        let profiles = profiles_dir();
        assert!(profiles.starts_with(app_data_dir()));
        assert!(profiles.ends_with("profiles"));
    }

    #[test]
    fn app_name_is_glossa() {
        assert_eq!(APP_NAME, "Glossa");
    }

    #[test]
    fn defaults_match_policy_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunk_size, 8);
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert!((config.fallback_confidence - 0.3).abs() < f32::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_replace_defaults() {
        let vars: HashMap<&str, &str> = [
            ("GLOSSA_CHUNK_SIZE", "4"),
            ("GLOSSA_PRIMARY_MODEL", "gemma2:9b"),
            ("GLOSSA_CALL_TIMEOUT_SECS", "12"),
        ]
        .into_iter()
        .collect();
        let config = PipelineConfig::default().with_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.chunk_size, 4);
        assert_eq!(config.primary_model, "gemma2:9b");
        assert_eq!(config.call_timeout, Duration::from_secs(12));
        assert_eq!(config.secondary_model, PipelineConfig::default().secondary_model);
    }

    #[test]
    fn unparseable_override_is_ignored() {
        let config = PipelineConfig::default()
            .with_overrides(|k| (k == "GLOSSA_CHUNK_SIZE").then(|| "lots".to_string()));
        assert_eq!(config.chunk_size, 8);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let config = PipelineConfig { chunk_size: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidPolicy(_))));
    }

    #[test]
    fn out_of_range_fallback_confidence_rejected() {
        let config = PipelineConfig { fallback_confidence: 1.5, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_partial_fields() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"chunk_size": 5, "call_timeout": 10, "base_backoff": 250}"#).unwrap();
        assert_eq!(config.chunk_size, 5);
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.base_backoff, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 3);
    }
}
