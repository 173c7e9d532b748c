//! Run diagnostics and report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::confidence::ConfidenceLevel;
use crate::consensus::ConsensusMetricValue;
use crate::entity::{GeoEntityId, GeoLevel};
use crate::finding::ResearchFinding;
use crate::metric::Metric;
use crate::trust::TrustAuditEntry;

use super::state::StageRecord;

/// An (entity, metric) pair with no usable data at any depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataGap {
    /// Entity id.
    pub entity: GeoEntityId,
    /// Entity name, for readers of the report.
    pub entity_name: String,
    /// Missing metric.
    pub metric: Metric,
}

/// Global counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Queries issued, fallback included.
    pub total_queries: usize,
    /// Queries that returned a response.
    pub successful_queries: usize,
    /// Queries that failed or timed out.
    pub failed_queries: usize,
    /// Queries cut off by the run deadline.
    pub cancelled_queries: usize,
    /// Planned queries dropped for lacking a target metric.
    pub dropped_queries: usize,
    /// Consensus values backed by two or more agreeing independent sources.
    pub multi_source_validations: usize,
    /// Cross-metric warnings raised.
    pub cross_metric_issues_count: usize,
    /// Mean effective weight of contributing findings.
    pub average_effective_weight: f64,
    /// Pairs left without data.
    pub data_gaps: Vec<DataGap>,
    /// Findings collapsed as mirrors.
    pub mirrors_collapsed: usize,
    /// Pairs filled by a fallback level.
    pub fallback_fills: usize,
    /// Findings about a different kind of metric than requested.
    pub topic_mismatches: usize,
}

impl Diagnostics {
    /// Mean effective weight over contributing findings; 0 when there are none.
    #[must_use]
    pub fn average_weight(findings: &[ResearchFinding]) -> f64 {
        let weights: Vec<f64> = findings
            .iter()
            .filter(|f| f.contributes())
            .map(|f| f.effective_weight)
            .collect();
        if weights.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = weights.len() as f64;
        weights.iter().sum::<f64>() / count
    }

    /// Values backed by at least two agreeing sources.
    #[must_use]
    pub fn count_multi_source(values: &[ConsensusMetricValue]) -> usize {
        values.iter().filter(|v| v.sources_count >= 2).count()
    }
}

/// Everything the engine concluded about one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    /// Entity id.
    pub entity: GeoEntityId,
    /// Entity name.
    pub name: String,
    /// Geographic level.
    pub level: GeoLevel,
    /// One value per requested metric, gaps included.
    pub values: Vec<ConsensusMetricValue>,
    /// Lowest confidence among values that carry data.
    pub weakest_confidence: ConfidenceLevel,
    /// Metrics with no data.
    pub gaps: Vec<Metric>,
    /// Entity-level problems, such as a failed plan.
    pub warnings: Vec<String>,
}

impl EntitySummary {
    /// The value for `metric`, if it was requested.
    #[must_use]
    pub fn value(&self, metric: &Metric) -> Option<&ConsensusMetricValue> {
        self.values.iter().find(|v| &v.metric == metric)
    }
}

/// Output of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Stages entered, in order.
    pub stages: Vec<StageRecord>,
    /// Every consensus value, in entity and metric order.
    pub values: Vec<ConsensusMetricValue>,
    /// Per-entity view of `values`.
    pub entities: Vec<EntitySummary>,
    /// Global counters.
    pub diagnostics: Diagnostics,
    /// Run-level problems. Non-empty whenever anything degraded the run.
    pub warnings: Vec<String>,
    /// Trust changes applied after aggregation.
    pub trust_adjustments: Vec<TrustAuditEntry>,
}

impl ReconciliationReport {
    /// The value for one pair.
    #[must_use]
    pub fn value(&self, entity: &GeoEntityId, metric: &Metric) -> Option<&ConsensusMetricValue> {
        self.values
            .iter()
            .find(|v| &v.entity == entity && &v.metric == metric)
    }

    /// Summary for one entity.
    #[must_use]
    pub fn entity(&self, entity: &GeoEntityId) -> Option<&EntitySummary> {
        self.entities.iter().find(|e| &e.entity == entity)
    }

    /// Whether the run reached its terminal stage.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stages.last().is_some_and(|s| s.state.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::fixtures::finding;

    #[test]
    fn average_weight_ignores_non_contributors() {
        let mut mismatched = finding("c.com", Metric::MedianRent, 1.0, 0.0, "c");
        mismatched.topic_mismatch = true;
        let findings = vec![
            finding("a.com", Metric::MedianRent, 1650.0, 0.9, "a"),
            finding("b.com", Metric::MedianRent, 1650.0, 0.5, "b"),
            mismatched,
        ];
        assert!((Diagnostics::average_weight(&findings) - 0.7).abs() < 1e-9);
        assert!(Diagnostics::average_weight(&[]).abs() < f64::EPSILON);
    }
}
