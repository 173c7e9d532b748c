//! Reconciliation pipeline.
//!
//! Orchestrates one run over a batch of entities:
//!
//! ```text
//! PLANNED -> COLLECTING -> DEDUPING -> VALIDATING -> FALLBACK_FILLING -> AGGREGATING -> DONE
//! ```
//!
//! A run is infallible. Planner failures, query failures, deadline
//! cancellations and data gaps are absorbed and reported; the only errors
//! the pipeline returns come from building it with an invalid configuration.

mod diagnostics;
mod feedback;
mod planner;
mod state;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collector::{CollectionTask, FailedQuery, FindingCollector, TopicPolicy, ValueExtractor};
use crate::config::EngineConfig;
use crate::confidence::ConfidenceLevel;
use crate::consensus::{ConsensusAggregator, ConsensusMetricValue};
use crate::dedup::deduplicate;
use crate::entity::{GeoEntityId, GeoRegistry};
use crate::error::{ConfigurationError, PlannerError};
use crate::fallback::FallbackResolver;
use crate::finding::ResearchFinding;
use crate::metric::Metric;
use crate::search::SearchProvider;
use crate::storage::TrustStore;
use crate::trust::{InMemoryTrustRegistry, TrustRegistry};
use crate::validation::{CrossMetricValidator, Severity, WarningIndex};

pub use diagnostics::{DataGap, Diagnostics, EntitySummary, ReconciliationReport};
pub use feedback::{adjust_trust, FeedbackConfig, FeedbackOutcome};
pub use planner::{PlanTemplate, Planner, TemplatePlanner};
pub use state::{PipelineState, StageRecord, StageTracker};

/// End-to-end reconciliation over a geographic registry.
pub struct ReconciliationPipeline {
    config: EngineConfig,
    registry: GeoRegistry,
    planner: Arc<dyn Planner>,
    trust: Arc<dyn TrustRegistry>,
    collector: FindingCollector,
    validator: CrossMetricValidator,
    fallback: FallbackResolver,
    aggregator: ConsensusAggregator,
}

impl std::fmt::Debug for ReconciliationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationPipeline")
            .field("planner", &self.planner.name())
            .field("trust", &self.trust.name())
            .field("entities", &self.registry.len())
            .field("collector", &self.collector)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RunState {
    findings: Vec<ResearchFinding>,
    requested: BTreeSet<(GeoEntityId, Metric)>,
    entity_warnings: BTreeMap<GeoEntityId, Vec<String>>,
    warnings: Vec<String>,
    diagnostics: Diagnostics,
}

impl RunState {
    fn count_collection(&mut self, attempted: usize, successful: usize, failed: &[FailedQuery]) {
        let cancelled = failed.iter().filter(|f| f.failure.is_cancelled()).count();
        self.diagnostics.total_queries += attempted;
        self.diagnostics.successful_queries += successful;
        self.diagnostics.failed_queries += failed.len() - cancelled;
        self.diagnostics.cancelled_queries += cancelled;
    }
}

impl ReconciliationPipeline {
    /// Builds a pipeline around an existing trust registry.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if any configuration section is invalid.
    pub fn new(
        config: EngineConfig,
        registry: GeoRegistry,
        planner: Arc<dyn Planner>,
        search: Arc<dyn SearchProvider>,
        trust: Arc<dyn TrustRegistry>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let collector = FindingCollector::new(
            search,
            Arc::clone(&trust),
            config.recency.clone(),
            config.collector.clone(),
        );
        let aggregator = ConsensusAggregator::new(config.aggregation.clone())
            .with_penalties(config.validation.penalties)
            .with_fallback_multiplier(config.fallback.confidence_multiplier)
            .with_stale_horizon(config.recency.stale_horizon_days);
        Ok(Self {
            validator: CrossMetricValidator::new(config.validation.clone()),
            fallback: FallbackResolver::new(config.fallback.clone()),
            aggregator,
            collector,
            config,
            registry,
            planner,
            trust,
        })
    }

    /// Builds a pipeline whose trust registry is created from `config.trust`,
    /// loading from `store` when given.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for invalid configuration or an
    /// unreadable trust store.
    pub fn from_config(
        config: EngineConfig,
        registry: GeoRegistry,
        planner: Arc<dyn Planner>,
        search: Arc<dyn SearchProvider>,
        store: Option<Arc<dyn TrustStore>>,
    ) -> Result<Self, ConfigurationError> {
        let trust = InMemoryTrustRegistry::from_config(&config.trust, store)?;
        Self::new(config, registry, planner, search, Arc::new(trust))
    }

    /// Replaces the collector's topic policy.
    #[must_use]
    pub fn with_topic_policy(mut self, topic: Arc<dyn TopicPolicy>) -> Self {
        self.collector = self.collector.with_topic_policy(topic);
        self
    }

    /// Replaces the collector's value extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn ValueExtractor>) -> Self {
        self.collector = self.collector.with_extractor(extractor);
        self
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Geographic registry.
    #[must_use]
    pub const fn registry(&self) -> &GeoRegistry {
        &self.registry
    }

    /// Trust registry shared with the collector.
    #[must_use]
    pub fn trust(&self) -> &Arc<dyn TrustRegistry> {
        &self.trust
    }

    /// Reconciles `entities` as of now.
    pub async fn run(&self, entities: &[GeoEntityId]) -> ReconciliationReport {
        self.run_at(entities, Utc::now()).await
    }

    /// Reconciles `entities`, aging data relative to `now`.
    pub async fn run_at(&self, entities: &[GeoEntityId], now: DateTime<Utc>) -> ReconciliationReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let deadline = Instant::now() + self.config.collector.run_timeout();
        let mut tracker = StageTracker::new(started_at);
        let mut run = RunState::default();

        info!(run_id = %run_id, entities = entities.len(), "Reconciliation run planned");
        let targets = self.plan(entities, deadline, &mut run).await;

        self.enter(&mut tracker, run_id);
        let collected = self.collector.collect(targets, deadline, now).await;
        run.count_collection(collected.attempted, collected.successful, &collected.failed);
        run.diagnostics.topic_mismatches += collected.topic_mismatches();
        run.findings = collected.findings;

        self.enter(&mut tracker, run_id);
        run.diagnostics.mirrors_collapsed += deduplicate(&mut run.findings, &self.config.dedup).mirrors_collapsed;

        self.enter(&mut tracker, run_id);
        let mut warnings = self.validator.validate(&run.findings, &self.aggregator);

        self.enter(&mut tracker, run_id);
        let requested: Vec<(GeoEntityId, Metric)> = run.requested.iter().cloned().collect();
        let missing = FallbackResolver::missing_pairs(&requested, &run.findings);
        if !missing.is_empty() {
            let filled = self
                .fallback
                .resolve(&self.collector, &self.registry, missing, &self.config.dedup, deadline, now)
                .await;
            run.count_collection(filled.attempted, filled.successful, &filled.failed);
            run.diagnostics.topic_mismatches += filled.findings.iter().filter(|f| f.topic_mismatch).count();
            run.diagnostics.mirrors_collapsed += filled.mirrors_collapsed;
            run.diagnostics.fallback_fills += filled.filled.len();
            run.findings.extend(filled.findings);
            if !filled.filled.is_empty() {
                warnings = self.validator.validate(&run.findings, &self.aggregator);
            }
        }

        self.enter(&mut tracker, run_id);
        let values = self.aggregate(&run.requested, &run.findings, &warnings, now);

        let feedback = adjust_trust(
            self.trust.as_ref(),
            &self.config.feedback,
            &self.config.aggregation,
            &run.findings,
            &values,
        );

        self.enter(&mut tracker, run_id);
        let report = self.report(run_id, started_at, tracker, run, &warnings, values, feedback);
        info!(
            run_id = %report.run_id,
            values = report.values.len(),
            gaps = report.diagnostics.data_gaps.len(),
            failed = report.diagnostics.failed_queries,
            cancelled = report.diagnostics.cancelled_queries,
            warnings = report.warnings.len(),
            "Reconciliation run complete"
        );
        report
    }

    fn enter(&self, tracker: &mut StageTracker, run_id: Uuid) {
        if tracker.advance(Utc::now()) {
            debug!(run_id = %run_id, stage = %tracker.current(), planner = self.planner.name(), "Stage entered");
        }
    }

    /// Plans every known entity, dropping queries without a target metric.
    ///
    /// Planner calls share the run deadline with collection.
    async fn plan(&self, entities: &[GeoEntityId], deadline: Instant, run: &mut RunState) -> Vec<CollectionTask> {
        let mut seen = BTreeSet::new();
        let mut tasks = Vec::new();
        for id in entities {
            if !seen.insert(*id) {
                continue;
            }
            let Some(entity) = self.registry.get(id) else {
                warn!(entity = %id, "Entity not in registry; skipped");
                run.warnings.push(format!("entity {id} is not in the registry"));
                continue;
            };
            let planned = tokio::time::timeout_at(deadline, self.planner.plan(entity, &self.registry))
                .await
                .unwrap_or(Err(PlannerError::DeadlineExceeded));
            let queries = match planned {
                Ok(queries) => queries,
                Err(e) => {
                    warn!(entity = %entity.name, error = %e, "Planner failed");
                    let message = format!("planning failed for {}: {e}", entity.name);
                    run.entity_warnings.entry(*id).or_default().push(message.clone());
                    run.warnings.push(message);
                    continue;
                }
            };
            for query in queries {
                let Some(metric) = query.target_metric.clone() else {
                    warn!(entity = %entity.name, query = %query.text, "Dropping query without a target metric");
                    run.diagnostics.dropped_queries += 1;
                    continue;
                };
                run.requested.insert((*id, metric.clone()));
                tasks.push(CollectionTask {
                    entity: *id,
                    queried_entity: *id,
                    metric,
                    query,
                    fallback_depth: 0,
                });
            }
        }
        if run.diagnostics.dropped_queries > 0 {
            run.warnings.push(format!(
                "{} planned query(ies) had no target metric and were dropped",
                run.diagnostics.dropped_queries
            ));
        }
        tasks
    }

    fn aggregate(
        &self,
        requested: &BTreeSet<(GeoEntityId, Metric)>,
        findings: &[ResearchFinding],
        warnings: &WarningIndex,
        now: DateTime<Utc>,
    ) -> Vec<ConsensusMetricValue> {
        let mut grouped: BTreeMap<(GeoEntityId, &Metric), Vec<&ResearchFinding>> = BTreeMap::new();
        for finding in findings {
            grouped.entry((finding.entity, &finding.metric)).or_default().push(finding);
        }
        let today = now.date_naive();
        requested
            .iter()
            .map(|(entity, metric)| {
                let pair_findings = grouped.get(&(*entity, metric)).map_or(&[][..], Vec::as_slice);
                let pair_warnings = warnings
                    .get(&(*entity, metric.clone()))
                    .map_or(&[][..], Vec::as_slice);
                self.aggregator
                    .aggregate(*entity, metric, pair_findings, pair_warnings, today)
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        tracker: StageTracker,
        mut run: RunState,
        warnings: &WarningIndex,
        values: Vec<ConsensusMetricValue>,
        feedback: FeedbackOutcome,
    ) -> ReconciliationReport {
        let name_of = |id: &GeoEntityId| {
            self.registry
                .get(id)
                .map_or_else(|| id.to_string(), |e| e.name.clone())
        };

        let mut diagnostics = std::mem::take(&mut run.diagnostics);
        diagnostics.cross_metric_issues_count = warnings.values().map(Vec::len).sum();
        diagnostics.multi_source_validations = Diagnostics::count_multi_source(&values);
        diagnostics.average_effective_weight = Diagnostics::average_weight(&run.findings);
        diagnostics.data_gaps = values
            .iter()
            .filter(|v| v.is_gap())
            .map(|v| DataGap {
                entity: v.entity,
                entity_name: name_of(&v.entity),
                metric: v.metric.clone(),
            })
            .collect();

        let mut global = run.warnings;
        if diagnostics.failed_queries > 0 {
            global.push(format!(
                "{} of {} queries failed",
                diagnostics.failed_queries, diagnostics.total_queries
            ));
        }
        if diagnostics.cancelled_queries > 0 {
            global.push(format!(
                "run deadline reached: {} queries cancelled",
                diagnostics.cancelled_queries
            ));
        }
        for gap in &diagnostics.data_gaps {
            global.push(format!("data gap: {} for {}", gap.metric, gap.entity_name));
        }
        let critical: BTreeSet<(GeoEntityId, String)> = warnings
            .values()
            .flatten()
            .filter(|w| w.severity == Severity::Critical)
            .map(|w| (w.entity, w.rule.clone()))
            .collect();
        for (entity, rule) in critical {
            global.push(format!("critical cross-metric issue for {}: {rule}", name_of(&entity)));
        }
        global.extend(feedback.warnings);

        let mut by_entity: BTreeMap<GeoEntityId, Vec<ConsensusMetricValue>> = BTreeMap::new();
        for value in &values {
            by_entity.entry(value.entity).or_default().push(value.clone());
        }
        for id in run.entity_warnings.keys() {
            by_entity.entry(*id).or_default();
        }
        let entities = by_entity
            .into_iter()
            .filter_map(|(id, entity_values)| {
                let entity = self.registry.get(&id)?;
                let weakest_confidence = entity_values
                    .iter()
                    .filter(|v| !v.is_gap())
                    .map(|v| v.confidence)
                    .min()
                    .unwrap_or(ConfidenceLevel::None);
                Some(EntitySummary {
                    entity: id,
                    name: entity.name.clone(),
                    level: entity.level,
                    gaps: entity_values
                        .iter()
                        .filter(|v| v.is_gap())
                        .map(|v| v.metric.clone())
                        .collect(),
                    weakest_confidence,
                    values: entity_values,
                    warnings: run.entity_warnings.remove(&id).unwrap_or_default(),
                })
            })
            .collect();

        let finished_at = Utc::now();
        ReconciliationReport {
            run_id,
            started_at,
            finished_at,
            stages: tracker.into_trace(),
            values,
            entities,
            diagnostics,
            warnings: global,
            trust_adjustments: feedback.adjustments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{GeoEntitySpec, GeoLevel};
    use crate::finding::ResearchQuery;
    use crate::search::ReplaySearchProvider;
    use async_trait::async_trait;

    struct BrokenPlanner;

    #[async_trait]
    impl Planner for BrokenPlanner {
        fn name(&self) -> &str {
            "broken"
        }

        async fn plan(
            &self,
            entity: &crate::entity::GeoEntity,
            _registry: &GeoRegistry,
        ) -> Result<Vec<ResearchQuery>, PlannerError> {
            if entity.name == "Peoria" {
                return Err(PlannerError::Unavailable {
                    message: "oracle offline".to_string(),
                });
            }
            let mut untargeted = ResearchQuery::new("housing market overview", Metric::MedianRent);
            untargeted.target_metric = None;
            Ok(vec![untargeted, ResearchQuery::new("median rent Springfield", Metric::MedianRent)])
        }
    }

    fn registry() -> GeoRegistry {
        let spec = |name: &str, level, parent: Option<&str>| GeoEntitySpec {
            name: name.to_string(),
            level,
            parent: parent.map(str::to_string),
            population: None,
        };
        GeoRegistry::from_specs(&[
            spec("Springfield", GeoLevel::City, Some("Illinois")),
            spec("Peoria", GeoLevel::City, Some("Illinois")),
            spec("Illinois", GeoLevel::State, None),
        ])
        .unwrap()
    }

    fn pipeline(search: ReplaySearchProvider, planner: Arc<dyn Planner>) -> ReconciliationPipeline {
        let mut config = EngineConfig::default();
        config.fallback.enabled = false;
        ReconciliationPipeline::from_config(config, registry(), planner, Arc::new(search), None).unwrap()
    }

    #[tokio::test]
    async fn planner_failures_and_untargeted_queries_are_absorbed() {
        let search = ReplaySearchProvider::new().hit(
            &["median rent"],
            "https://www.zillow.com/springfield",
            "Median rent in Springfield is $1,650 as of October 2024.",
        );
        let pipeline = pipeline(search, Arc::new(BrokenPlanner));
        let springfield = GeoEntityId::derive("Springfield", GeoLevel::City);
        let peoria = GeoEntityId::derive("Peoria", GeoLevel::City);
        let report = pipeline.run(&[springfield, peoria]).await;

        assert!(report.is_complete());
        assert_eq!(report.diagnostics.dropped_queries, 1);
        assert_eq!(report.diagnostics.total_queries, 1);
        assert!(report.warnings.iter().any(|w| w.contains("planning failed for Peoria")));
        let peoria_summary = report.entity(&peoria).unwrap();
        assert!(peoria_summary.values.is_empty());
        assert_eq!(peoria_summary.warnings.len(), 1);
        let rent = report.value(&springfield, &Metric::MedianRent).unwrap();
        assert_eq!(rent.value, Some(1650.0));
    }

    struct HangingPlanner;

    #[async_trait]
    impl Planner for HangingPlanner {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn plan(
            &self,
            entity: &crate::entity::GeoEntity,
            _registry: &GeoRegistry,
        ) -> Result<Vec<ResearchQuery>, PlannerError> {
            if entity.name == "Peoria" {
                tokio::time::sleep(std::time::Duration::from_secs(3_600)).await;
            }
            Ok(vec![ResearchQuery::new("median rent Springfield", Metric::MedianRent)])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_planner_is_bounded_by_the_run_deadline() {
        let mut config = EngineConfig::default();
        config.fallback.enabled = false;
        config.collector.run_timeout_ms = 500;
        let pipeline = ReconciliationPipeline::from_config(
            config,
            registry(),
            Arc::new(HangingPlanner),
            Arc::new(ReplaySearchProvider::new()),
            None,
        )
        .unwrap();
        let springfield = GeoEntityId::derive("Springfield", GeoLevel::City);
        let peoria = GeoEntityId::derive("Peoria", GeoLevel::City);

        let started = Instant::now();
        let report = pipeline.run(&[springfield, peoria]).await;
        assert!(started.elapsed() < std::time::Duration::from_secs(60));

        assert!(report.is_complete());
        let message = "planning failed for Peoria: Planner did not answer before the run deadline";
        assert!(report.warnings.iter().any(|w| w == message));
        assert_eq!(report.entity(&peoria).unwrap().warnings, vec![message.to_string()]);
        assert!(report.value(&springfield, &Metric::MedianRent).is_some());
    }

    #[tokio::test]
    async fn unknown_entities_are_reported() {
        let pipeline = pipeline(ReplaySearchProvider::new(), Arc::new(BrokenPlanner));
        let stranger = GeoEntityId::derive("Atlantis", GeoLevel::City);
        let report = pipeline.run(&[stranger]).await;
        assert!(report.is_complete());
        assert!(report.values.is_empty());
        assert!(report.warnings.iter().any(|w| w.contains("not in the registry")));
    }

    #[test]
    fn invalid_config_fails_construction() {
        let mut config = EngineConfig::default();
        config.collector.fan_out = 0;
        let result = ReconciliationPipeline::from_config(
            config,
            registry(),
            Arc::new(TemplatePlanner::default()),
            Arc::new(ReplaySearchProvider::new()),
            None,
        );
        assert!(result.is_err());
    }
}
