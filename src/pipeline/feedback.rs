//! Trust self-adjustment.
//!
//! Runs once, sequentially, after aggregation. Hosts whose direct findings
//! agreed with a MEDIUM-or-better consensus are nudged up; hosts that missed
//! it by more than `disagreement_factor` tolerances are nudged down. Every
//! change goes through the registry's audited update.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::confidence::ConfidenceLevel;
use crate::consensus::{AggregationConfig, ConsensusMetricValue};
use crate::entity::GeoEntityId;
use crate::error::ConfigurationError;
use crate::finding::ResearchFinding;
use crate::metric::Metric;
use crate::source::SourceHost;
use crate::trust::{TrustAuditEntry, TrustRegistry};

/// Trust adjustment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Whether the pass runs at all.
    pub enabled: bool,
    /// Added per agreeing finding.
    pub agreement_reward: f64,
    /// Subtracted per strongly disagreeing finding.
    pub disagreement_penalty: f64,
    /// Multiple of the metric tolerance beyond which a finding disagrees.
    pub disagreement_factor: f64,
    /// Largest net change applied to one host in one run.
    pub max_step: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            agreement_reward: 0.02,
            disagreement_penalty: 0.05,
            disagreement_factor: 2.0,
            max_step: 0.1,
        }
    }
}

impl FeedbackConfig {
    /// Validates step sizes.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidSetting` for a negative or
    /// out-of-range step, or a disagreement factor below 1.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (field, value) in [
            ("feedback.agreement_reward", self.agreement_reward),
            ("feedback.disagreement_penalty", self.disagreement_penalty),
            ("feedback.max_step", self.max_step),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::setting(field, format!("{value} is outside [0, 1]")));
            }
        }
        if !(self.disagreement_factor >= 1.0 && self.disagreement_factor.is_finite()) {
            return Err(ConfigurationError::setting(
                "feedback.disagreement_factor",
                format!("{} must be at least 1", self.disagreement_factor),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HostTally {
    agreed: usize,
    disagreed: usize,
}

/// Result of one feedback pass.
#[derive(Debug, Clone, Default)]
pub struct FeedbackOutcome {
    /// Applied updates, in host order.
    pub adjustments: Vec<TrustAuditEntry>,
    /// Updates that could not be persisted.
    pub warnings: Vec<String>,
}

/// Applies trust feedback for one run.
#[must_use]
pub fn adjust_trust(
    registry: &dyn TrustRegistry,
    config: &FeedbackConfig,
    aggregation: &AggregationConfig,
    findings: &[ResearchFinding],
    values: &[ConsensusMetricValue],
) -> FeedbackOutcome {
    let mut outcome = FeedbackOutcome::default();
    if !config.enabled {
        return outcome;
    }

    let consensus: HashMap<(GeoEntityId, &Metric), f64> = values
        .iter()
        .filter(|v| v.confidence >= ConfidenceLevel::Medium)
        .filter_map(|v| v.value.map(|value| ((v.entity, &v.metric), value)))
        .collect();

    let mut tallies: BTreeMap<SourceHost, HostTally> = BTreeMap::new();
    for finding in findings.iter().filter(|f| f.is_direct() && f.contributes()) {
        if finding.actual_source_host.is_unknown() {
            continue;
        }
        let (Some(observed), Some(&target)) = (
            finding.value(),
            consensus.get(&(finding.entity, &finding.metric)),
        ) else {
            continue;
        };
        let tolerance = aggregation.tolerance_for(&finding.metric) * target.abs().max(f64::EPSILON);
        let miss = (observed - target).abs();
        let tally = tallies.entry(finding.actual_source_host.clone()).or_default();
        if miss <= tolerance {
            tally.agreed += 1;
        } else if miss > tolerance * config.disagreement_factor {
            tally.disagreed += 1;
        }
    }

    for (host, tally) in tallies {
        #[allow(clippy::cast_precision_loss)]
        let delta = (tally.agreed as f64)
            .mul_add(config.agreement_reward, -(tally.disagreed as f64) * config.disagreement_penalty)
            .clamp(-config.max_step, config.max_step);
        if delta == 0.0 {
            continue;
        }
        let reason = format!(
            "consensus feedback: {} agreeing, {} disagreeing finding(s)",
            tally.agreed, tally.disagreed
        );
        match registry.record_observed_accuracy(&host, delta, &reason) {
            Ok(entry) => {
                debug!(host = %host, delta, new_weight = entry.new_weight, "Applied trust feedback");
                outcome.adjustments.push(entry);
            }
            Err(e) => {
                warn!(host = %host, error = %e, "Failed to persist trust feedback");
                outcome
                    .warnings
                    .push(format!("trust update for {host} was not persisted: {e}"));
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::confidence::ConfidenceScore;
    use crate::consensus::AggregationMethod;
    use crate::finding::fixtures::finding;
    use crate::trust::InMemoryTrustRegistry;

    fn consensus(f: &ResearchFinding, value: f64, confidence: ConfidenceLevel) -> ConsensusMetricValue {
        ConsensusMetricValue {
            entity: f.entity,
            metric: f.metric.clone(),
            value: Some(value),
            confidence,
            score: ConfidenceScore::clamped(confidence.base_score()),
            sources_count: 1,
            fallback_depth: 0,
            method: AggregationMethod::WeightedMean,
            hosts: BTreeSet::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn agreeing_hosts_gain_and_outliers_lose() {
        let registry = InMemoryTrustRegistry::new(0.6).unwrap();
        let findings = vec![
            finding("a.com", Metric::MedianRent, 1650.0, 0.9, "a"),
            finding("b.com", Metric::MedianRent, 1200.0, 0.3, "b"),
            finding("c.com", Metric::MedianRent, 900.0, 0.3, "c"),
        ];
        let values = vec![consensus(&findings[0], 1650.0, ConfidenceLevel::Medium)];
        let outcome = adjust_trust(
            &registry,
            &FeedbackConfig::default(),
            &AggregationConfig::default(),
            &findings,
            &values,
        );

        // b.com misses by less than twice the tolerance: left alone.
        assert_eq!(outcome.adjustments.len(), 2);
        assert!(outcome.warnings.is_empty());
        let a = registry.weight_for(&SourceHost::parse("a.com").unwrap());
        let c = registry.weight_for(&SourceHost::parse("c.com").unwrap());
        assert!((a - 0.62).abs() < 1e-9);
        assert!((c - 0.55).abs() < 1e-9);
        assert_eq!(registry.audit_log().len(), 2);
    }

    #[test]
    fn low_confidence_consensus_is_not_a_reference() {
        let registry = InMemoryTrustRegistry::new(0.6).unwrap();
        let findings = vec![finding("a.com", Metric::MedianRent, 1650.0, 0.9, "a")];
        let values = vec![consensus(&findings[0], 1650.0, ConfidenceLevel::Low)];
        let outcome = adjust_trust(
            &registry,
            &FeedbackConfig::default(),
            &AggregationConfig::default(),
            &findings,
            &values,
        );
        assert!(outcome.adjustments.is_empty());
    }

    #[test]
    fn fallback_findings_are_ignored() {
        let registry = InMemoryTrustRegistry::new(0.6).unwrap();
        let mut county = finding("a.com", Metric::MedianRent, 900.0, 0.9, "a");
        county.fallback_depth = 1;
        let values = vec![consensus(&county, 1650.0, ConfidenceLevel::Medium)];
        let outcome = adjust_trust(
            &registry,
            &FeedbackConfig::default(),
            &AggregationConfig::default(),
            &[county],
            &values,
        );
        assert!(outcome.adjustments.is_empty());
    }

    #[test]
    fn disabled_pass_does_nothing() {
        let registry = InMemoryTrustRegistry::new(0.6).unwrap();
        let findings = vec![finding("a.com", Metric::MedianRent, 1650.0, 0.9, "a")];
        let values = vec![consensus(&findings[0], 1650.0, ConfidenceLevel::High)];
        let config = FeedbackConfig {
            enabled: false,
            ..FeedbackConfig::default()
        };
        let outcome = adjust_trust(&registry, &config, &AggregationConfig::default(), &findings, &values);
        assert!(outcome.adjustments.is_empty());
        assert!(registry.audit_log().is_empty());
    }

    #[test]
    fn validation_bounds() {
        assert!(FeedbackConfig::default().validate().is_ok());
        let config = FeedbackConfig {
            disagreement_factor: 0.5,
            ..FeedbackConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
