//! Engine configuration.
//!
//! One serde tree with defaults everywhere, so a config file only needs the
//! settings it changes. Validation happens once, when the pipeline is built.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collector::CollectorConfig;
use crate::consensus::AggregationConfig;
use crate::dedup::DedupConfig;
use crate::error::ConfigurationError;
use crate::fallback::FallbackConfig;
use crate::pipeline::FeedbackConfig;
use crate::recency::RecencyConfig;
use crate::trust::TrustConfig;
use crate::validation::ValidationConfig;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Source trust defaults and seeds.
    pub trust: TrustConfig,
    /// Freshness policies.
    pub recency: RecencyConfig,
    /// Search fan-out and timeouts.
    pub collector: CollectorConfig,
    /// Mirror detection.
    pub dedup: DedupConfig,
    /// Cross-metric rules.
    pub validation: ValidationConfig,
    /// Geographic fallback chain.
    pub fallback: FallbackConfig,
    /// Consensus tolerances and thresholds.
    pub aggregation: AggregationConfig,
    /// Post-run trust adjustment.
    pub feedback: FeedbackConfig,
}

impl EngineConfig {
    /// Parses a JSON document; missing sections take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Malformed` if the JSON does not match the schema.
    ///
    /// # Examples
    ///
    /// ```
    /// use market_consensus::config::EngineConfig;
    ///
    /// let config = EngineConfig::from_json_str(r#"{"trust": {"default_weight": 0.5}}"#).unwrap();
    /// assert!((config.trust.default_weight - 0.5).abs() < f64::EPSILON);
    /// assert_eq!(config.collector.fan_out, 8);
    /// ```
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(raw).map_err(|e| ConfigurationError::Malformed {
            message: e.to_string(),
        })
    }

    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Unreadable` if the file cannot be read and
    /// `ConfigurationError::Malformed` if it cannot be parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Unreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.trust.validate()?;
        self.recency.validate()?;
        self.collector.validate()?;
        self.dedup.validate()?;
        self.validation.validate()?;
        self.fallback.validate()?;
        self.aggregation.validate()?;
        self.feedback.validate()
    }
}
