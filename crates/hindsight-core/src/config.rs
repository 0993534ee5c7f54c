//! Tunable thresholds for extraction, aggregation, scoring and advice
//!
//! Every constant the feedback loop relies on lives here with its default.
//! A `config.toml` in the base directory may override any subset of them:
//!
//! ```toml
//! [scoring]
//! top_k = 8
//!
//! [advisory]
//! risk_window_days = 21
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Result;

/// Environment variable that locates the storage root
pub const BASE_DIR_ENV: &str = "HINDSIGHT_DIR";

/// Storage root used when neither flag nor environment variable is set
pub const DEFAULT_BASE_DIR: &str = "~/.hindsight";

/// Name of the optional configuration file inside the base directory
pub const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HindsightConfig {
    pub extraction: ExtractionConfig,
    pub aggregation: AggregationConfig,
    pub scoring: ScoringConfig,
    pub advisory: AdvisoryConfig,
}

impl HindsightConfig {
    /// Load `config.toml` from the base directory, falling back to defaults
    /// when the file does not exist.
    pub async fn load(base_dir: impl AsRef<Path>) -> Result<Self> {
        let path = base_dir.as_ref().join(CONFIG_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let config = Self::from_toml_str(&content)?;
                tracing::debug!(path = %path.display(), "loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Learning Extractor thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Rows a capability must appear in before it gets a performance learning
    pub min_capability_usage: usize,
    /// Capability success rate below which the learning is actionable
    pub capability_success_threshold: f64,
    /// Completion rate needed for an estimate to count as accurate
    pub estimation_completion_threshold: f64,
    /// Iterations allowed for an estimate to count as accurate
    pub estimation_max_iterations: u32,
    /// Completion rate needed for a general success learning
    pub success_completion_threshold: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_capability_usage: 2,
            capability_success_threshold: 0.8,
            estimation_completion_threshold: 0.8,
            estimation_max_iterations: 2,
            success_completion_threshold: 0.9,
        }
    }
}

/// Pattern Aggregator thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Group size at which repeated signals become a pattern
    pub min_occurrences: usize,
    /// Characters of the criterion used as the failure grouping key
    pub criterion_key_length: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 2,
            criterion_key_length: 50,
        }
    }
}

/// Relevance Scorer weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub context_weight: f64,
    pub outcome_weight: f64,
    pub recency_weight: f64,
    /// Exponential decay rate per day
    pub decay_rate: f64,
    /// Age in days under which a failure pattern still counts as fresh
    pub fresh_failure_days: f64,
    /// Number of learnings returned
    pub top_k: usize,
    /// Words must be longer than this to take part in matching
    pub min_word_length: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            context_weight: 0.4,
            outcome_weight: 0.3,
            recency_weight: 0.3,
            decay_rate: 0.1,
            fresh_failure_days: 7.0,
            top_k: 5,
            min_word_length: 3,
        }
    }
}

/// Advisory Synthesizer thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    /// Window for repeated-failure risk warnings
    pub risk_window_days: i64,
    /// Repeat count at which a recent failure is high severity
    pub high_severity_repeats: usize,
    pub max_risk_warnings: usize,
    pub max_success_patterns: usize,
    pub max_recommendations: usize,
    pub max_capabilities: usize,
    /// Score an actionable learning needs before it is recommended
    pub consider_score_threshold: f64,
    /// Request overlap needed for a learning to vote on effort
    pub effort_overlap_threshold: f64,
    /// Requests shorter than this may be shifted down by a simplicity keyword
    pub short_request_length: usize,
    pub complexity_keywords: Vec<String>,
    pub simplicity_keywords: Vec<String>,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            risk_window_days: 14,
            high_severity_repeats: 3,
            max_risk_warnings: 5,
            max_success_patterns: 5,
            max_recommendations: 5,
            max_capabilities: 3,
            consider_score_threshold: 0.3,
            effort_overlap_threshold: 0.3,
            short_request_length: 50,
            complexity_keywords: ["refactor", "redesign", "overhaul", "migrate", "architecture"]
                .into_iter()
                .map(String::from)
                .collect(),
            simplicity_keywords: ["fix", "typo", "update", "add", "tweak"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HindsightConfig::default();

        assert_eq!(config.aggregation.min_occurrences, 2);
        assert_eq!(config.aggregation.criterion_key_length, 50);
        assert_eq!(config.advisory.risk_window_days, 14);
        assert_eq!(config.scoring.top_k, 5);
        assert!((config.scoring.context_weight - 0.4).abs() < f64::EPSILON);
        assert!((config.extraction.success_completion_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_override() {
        let config = HindsightConfig::from_toml_str(
            r#"
[scoring]
top_k = 8

[advisory]
risk_window_days = 21
"#,
        )
        .unwrap();

        assert_eq!(config.scoring.top_k, 8);
        assert_eq!(config.advisory.risk_window_days, 21);
        // Untouched fields keep their defaults
        assert_eq!(config.scoring.decay_rate, 0.1);
        assert_eq!(config.aggregation, AggregationConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = HindsightConfig::from_toml_str("scoring = [").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = HindsightConfig::load(temp.path()).await.unwrap();
        assert_eq!(config, HindsightConfig::default());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(
            temp.path().join(CONFIG_FILE),
            "[aggregation]\nmin_occurrences = 3\n",
        )
        .await
        .unwrap();

        let config = HindsightConfig::load(temp.path()).await.unwrap();
        assert_eq!(config.aggregation.min_occurrences, 3);
    }
}
