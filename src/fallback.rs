//! Geographic fallback resolution.
//!
//! When an (entity, metric) pair has no contributing finding, the resolver
//! walks a fixed chain of broader or neighbouring sources:
//!
//! 1. the parent region (county/metro)
//! 2. a state-wide percentile estimate for entities of the same level
//! 3. comparably sized entities in the same state
//! 4. the state average
//!
//! Each level issues its queries for every still-missing pair concurrently,
//! and findings are attributed to the original entity with the level's depth.
//! Pairs that no level can fill are data gaps; no value is ever invented.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::collector::{CollectionTask, FailedQuery, FindingCollector};
use crate::dedup::{deduplicate, DedupConfig};
use crate::entity::{GeoEntity, GeoEntityId, GeoLevel, GeoRegistry};
use crate::error::ConfigurationError;
use crate::finding::{ResearchFinding, ResearchQuery};
use crate::metric::Metric;

/// One step of the fallback chain, in the order tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackLevel {
    /// The enclosing county or region.
    ParentRegion,
    /// State-wide median among entities of the same level.
    StatePercentile,
    /// Comparably sized entities in the same state.
    Comparables,
    /// The state average.
    StateAverage,
}

impl FallbackLevel {
    /// All levels, in chain order.
    pub const CHAIN: [Self; 4] = [
        Self::ParentRegion,
        Self::StatePercentile,
        Self::Comparables,
        Self::StateAverage,
    ];

    /// Fallback depth recorded on findings from this level (1-4).
    #[must_use]
    pub const fn depth(self) -> u8 {
        match self {
            Self::ParentRegion => 1,
            Self::StatePercentile => 2,
            Self::Comparables => 3,
            Self::StateAverage => 4,
        }
    }
}

impl fmt::Display for FallbackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentRegion => write!(f, "parent_region"),
            Self::StatePercentile => write!(f, "state_percentile"),
            Self::Comparables => write!(f, "comparables"),
            Self::StateAverage => write!(f, "state_average"),
        }
    }
}

/// Fallback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Whether to walk the chain at all.
    pub enabled: bool,
    /// Confidence multiplier applied once per level of depth.
    pub confidence_multiplier: f64,
    /// Number of comparable entities queried at the comparables level.
    pub comparable_count: usize,
    /// Source hints used for fallback queries; empty means unhinted.
    pub source_hints: Vec<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_multiplier: 0.5,
            comparable_count: 3,
            source_hints: vec!["census.gov".to_string(), "zillow.com".to_string()],
        }
    }
}

impl FallbackConfig {
    /// Validates the multiplier.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidSetting` for a multiplier outside (0, 1].
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.confidence_multiplier > 0.0 && self.confidence_multiplier <= 1.0) {
            return Err(ConfigurationError::setting(
                "fallback.confidence_multiplier",
                format!("{} is outside (0, 1]", self.confidence_multiplier),
            ));
        }
        Ok(())
    }

    /// Multiplier for findings at `depth`.
    #[must_use]
    pub fn multiplier_for(&self, depth: u8) -> f64 {
        self.confidence_multiplier.powi(i32::from(depth))
    }
}

/// A pair filled by a fallback level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackFill {
    /// Entity filled.
    pub entity: GeoEntityId,
    /// Metric filled.
    pub metric: Metric,
    /// Level that produced data.
    pub level: FallbackLevel,
}

/// Result of walking the chain.
#[derive(Debug, Clone, Default)]
pub struct FallbackOutcome {
    /// Findings from all levels, attributed to the original entities.
    pub findings: Vec<ResearchFinding>,
    /// Queries issued.
    pub attempted: usize,
    /// Queries that returned a response.
    pub successful: usize,
    /// Queries that failed.
    pub failed: Vec<FailedQuery>,
    /// Mirrors collapsed among fallback findings.
    pub mirrors_collapsed: usize,
    /// Pairs filled, with the level that filled them.
    pub filled: Vec<FallbackFill>,
    /// Pairs no level could fill.
    pub gaps: Vec<(GeoEntityId, Metric)>,
}

/// Plans and runs fallback levels.
#[derive(Debug, Clone, Default)]
pub struct FallbackResolver {
    config: FallbackConfig,
}

impl FallbackResolver {
    /// Creates a resolver.
    #[must_use]
    pub const fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    /// Fallback settings.
    #[must_use]
    pub const fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Pairs among `requested` with no contributing finding.
    #[must_use]
    pub fn missing_pairs(
        requested: &[(GeoEntityId, Metric)],
        findings: &[ResearchFinding],
    ) -> Vec<(GeoEntityId, Metric)> {
        let covered: BTreeSet<(GeoEntityId, &Metric)> = findings
            .iter()
            .filter(|f| f.contributes())
            .map(|f| (f.entity, &f.metric))
            .collect();
        requested
            .iter()
            .filter(|(e, m)| !covered.contains(&(*e, m)))
            .cloned()
            .collect()
    }

    /// Tasks for one level and pair; empty when the level has no target.
    #[must_use]
    pub fn tasks_for(
        &self,
        registry: &GeoRegistry,
        level: FallbackLevel,
        entity: &GeoEntityId,
        metric: &Metric,
    ) -> Vec<CollectionTask> {
        let Some(target) = registry.get(entity) else {
            return Vec::new();
        };
        let state = registry.ancestor_at_level(entity, GeoLevel::State);
        let label = metric.label();

        let queries: Vec<(GeoEntityId, String)> = match level {
            FallbackLevel::ParentRegion => registry
                .parent(entity)
                .filter(|p| p.level < GeoLevel::State)
                .map(|p| (p.id, format!("{label} in {}", place(registry, p))))
                .into_iter()
                .collect(),
            FallbackLevel::StatePercentile => state
                .map(|s| {
                    (
                        s.id,
                        format!("50th percentile {label} for {} areas in {}", target.level, s.name),
                    )
                })
                .into_iter()
                .collect(),
            FallbackLevel::Comparables => registry
                .comparables(entity, self.config.comparable_count)
                .into_iter()
                .map(|c| (c.id, format!("{label} in {}", place(registry, c))))
                .collect(),
            FallbackLevel::StateAverage => state
                .map(|s| (s.id, format!("statewide average {label} in {}", s.name)))
                .into_iter()
                .collect(),
        };

        let hints: Vec<Option<&str>> = if self.config.source_hints.is_empty() {
            vec![None]
        } else {
            self.config.source_hints.iter().map(|h| Some(h.as_str())).collect()
        };

        queries
            .into_iter()
            .flat_map(|(queried, text)| {
                hints.iter().map(move |hint| {
                    let mut query = ResearchQuery::new(with_site(&text, *hint), metric.clone())
                        .with_validation_hint(format!("fallback:{level}"));
                    query.intended_source_hint = hint.map(str::to_string);
                    CollectionTask {
                        entity: *entity,
                        queried_entity: queried,
                        metric: metric.clone(),
                        query,
                        fallback_depth: level.depth(),
                    }
                })
            })
            .collect()
    }

    /// Walks the chain for `missing` pairs until each is filled or exhausted.
    pub async fn resolve(
        &self,
        collector: &FindingCollector,
        registry: &GeoRegistry,
        missing: Vec<(GeoEntityId, Metric)>,
        dedup: &DedupConfig,
        deadline: Instant,
        now: DateTime<Utc>,
    ) -> FallbackOutcome {
        let mut outcome = FallbackOutcome::default();
        if !self.config.enabled {
            outcome.gaps = missing;
            return outcome;
        }

        let mut pending = missing;
        for level in FallbackLevel::CHAIN {
            if pending.is_empty() {
                break;
            }
            let tasks: Vec<CollectionTask> = pending
                .iter()
                .flat_map(|(entity, metric)| self.tasks_for(registry, level, entity, metric))
                .collect();
            if tasks.is_empty() {
                debug!(level = %level, pending = pending.len(), "No fallback targets at this level");
                continue;
            }

            debug!(level = %level, queries = tasks.len(), pending = pending.len(), "Running fallback level");
            let mut collected = collector.collect(tasks, deadline, now).await;
            outcome.mirrors_collapsed += deduplicate(&mut collected.findings, dedup).mirrors_collapsed;
            outcome.attempted += collected.attempted;
            outcome.successful += collected.successful;
            outcome.failed.extend(collected.failed);

            let still_missing = Self::missing_pairs(&pending, &collected.findings);
            for (entity, metric) in &pending {
                if !still_missing.contains(&(*entity, metric.clone())) {
                    info!(entity = %entity, metric = %metric, level = %level, "Filled by fallback");
                    outcome.filled.push(FallbackFill {
                        entity: *entity,
                        metric: metric.clone(),
                        level,
                    });
                }
            }
            outcome.findings.extend(collected.findings);
            pending = still_missing;
        }

        outcome.gaps = pending;
        outcome
    }
}

fn place(registry: &GeoRegistry, entity: &GeoEntity) -> String {
    registry
        .qualified_name(&entity.id)
        .unwrap_or_else(|| entity.name.clone())
}

fn with_site(text: &str, hint: Option<&str>) -> String {
    match hint {
        Some(hint) => format!("{text} site:{hint}"),
        None => text.to_string(),
    }
}
