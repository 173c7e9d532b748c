//! Cross-metric validation.
//!
//! Sanity rules run per entity over provisional values: the consensus the
//! aggregator would report from each metric's contributing findings. Violations become
//! [`ValidationWarning`]s that degrade confidence; nothing is rejected and no
//! entity is ever dropped from results.

mod rules;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consensus::ConsensusAggregator;
use crate::entity::GeoEntityId;
use crate::error::ConfigurationError;
use crate::finding::ResearchFinding;
use crate::metric::Metric;

pub use rules::{CrossMetricRule, RuleViolation};

/// Severity of a validation warning, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Minor inconsistency.
    Low,
    /// Noticeable inconsistency.
    Medium,
    /// Likely wrong.
    High,
    /// Almost certainly wrong; caps confidence at LOW.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Confidence-score penalty per severity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityPenalties {
    /// Penalty for a CRITICAL warning.
    pub critical: f64,
    /// Penalty for a HIGH warning.
    pub high: f64,
    /// Penalty for a MEDIUM warning.
    pub medium: f64,
    /// Penalty for a LOW warning.
    pub low: f64,
}

impl Default for SeverityPenalties {
    fn default() -> Self {
        Self {
            critical: 0.4,
            high: 0.25,
            medium: 0.1,
            low: 0.05,
        }
    }
}

impl SeverityPenalties {
    /// Penalty for `severity`.
    #[must_use]
    pub const fn for_severity(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Rules applied to every entity.
    pub rules: Vec<CrossMetricRule>,
    /// Score penalty per severity.
    pub penalties: SeverityPenalties,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            rules: CrossMetricRule::defaults(),
            penalties: SeverityPenalties::default(),
        }
    }
}

impl ValidationConfig {
    /// Validates every rule and penalty.
    ///
    /// # Errors
    ///
    /// Returns the first invalid rule, or `InvalidSetting` for a penalty
    /// outside [0, 1].
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for rule in &self.rules {
            rule.validate()?;
        }
        let p = self.penalties;
        for (name, value) in [
            ("critical", p.critical),
            ("high", p.high),
            ("medium", p.medium),
            ("low", p.low),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::setting(
                    format!("validation.penalties.{name}"),
                    format!("{value} is outside [0, 1]"),
                ));
            }
        }
        Ok(())
    }
}

/// A cross-metric inconsistency attached to one (entity, metric) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    /// Entity the warning is about.
    pub entity: GeoEntityId,
    /// Metric the warning degrades.
    pub metric: Metric,
    /// Rule that fired.
    pub rule: String,
    /// How serious it is.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.rule, self.message)
    }
}

/// Warnings keyed by (entity, metric).
pub type WarningIndex = HashMap<(GeoEntityId, Metric), Vec<ValidationWarning>>;

/// Runs configured rules over per-entity provisional values.
#[derive(Debug, Clone, Default)]
pub struct CrossMetricValidator {
    config: ValidationConfig,
}

impl CrossMetricValidator {
    /// Creates a validator.
    #[must_use]
    pub const fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Configured penalties.
    #[must_use]
    pub const fn penalties(&self) -> &SeverityPenalties {
        &self.config.penalties
    }

    /// Checks one entity's values, returning one warning per implicated metric.
    #[must_use]
    pub fn validate_entity(&self, entity: GeoEntityId, values: &BTreeMap<Metric, f64>) -> Vec<ValidationWarning> {
        let mut out = Vec::new();
        for rule in &self.config.rules {
            let Some(violation) = rule.evaluate(values) else {
                continue;
            };
            if violation.severity == Severity::Critical {
                warn!(entity = %entity, rule = rule.name(), message = %violation.message, "Critical cross-metric violation");
            } else {
                debug!(entity = %entity, rule = rule.name(), severity = %violation.severity, "Cross-metric violation");
            }
            for metric in violation.metrics {
                out.push(ValidationWarning {
                    entity,
                    metric,
                    rule: rule.name().to_string(),
                    severity: violation.severity,
                    message: violation.message.clone(),
                });
            }
        }
        out
    }

    /// Validates every entity that has findings and indexes the warnings.
    #[must_use]
    pub fn validate(&self, findings: &[ResearchFinding], aggregator: &ConsensusAggregator) -> WarningIndex {
        let mut index = WarningIndex::new();
        for (entity, values) in provisional_values(findings, aggregator) {
            for warning in self.validate_entity(entity, &values) {
                index
                    .entry((warning.entity, warning.metric.clone()))
                    .or_default()
                    .push(warning);
            }
        }
        index
    }
}

/// Values the aggregator would report from contributing findings, per entity and metric.
#[must_use]
pub fn provisional_values(
    findings: &[ResearchFinding],
    aggregator: &ConsensusAggregator,
) -> BTreeMap<GeoEntityId, BTreeMap<Metric, f64>> {
    let mut pairs: BTreeMap<(GeoEntityId, Metric), Vec<&ResearchFinding>> = BTreeMap::new();
    for finding in findings.iter().filter(|f| f.contributes()) {
        pairs
            .entry((finding.entity, finding.metric.clone()))
            .or_default()
            .push(finding);
    }

    let mut out: BTreeMap<GeoEntityId, BTreeMap<Metric, f64>> = BTreeMap::new();
    for ((entity, metric), group) in pairs {
        if let Some(value) = aggregator.provisional_value(&metric, &group) {
            out.entry(entity).or_default().insert(metric, value);
        }
    }
    out
}
