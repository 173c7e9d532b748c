//! Query planning.
//!
//! The planner oracle turns an entity into research queries. Any
//! implementation may be plugged in; [`TemplatePlanner`] is a deterministic
//! one that renders a query per (metric, source hint) pair.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::{GeoEntity, GeoRegistry};
use crate::error::PlannerError;
use crate::finding::ResearchQuery;
use crate::metric::Metric;

/// Produces the research queries for one entity.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Planner name, for logs.
    fn name(&self) -> &str;

    /// Queries for `entity`. Queries without a target metric are dropped by
    /// the pipeline before collection.
    async fn plan(&self, entity: &GeoEntity, registry: &GeoRegistry) -> Result<Vec<ResearchQuery>, PlannerError>;
}

/// A (metric, sources) line of a template plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTemplate {
    /// Metric to research.
    pub metric: Metric,
    /// Hosts to ask; an empty list issues one query without a site filter.
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Renders "{label} in {place} site:{source}" for every template line.
#[derive(Debug, Clone, Default)]
pub struct TemplatePlanner {
    templates: Vec<PlanTemplate>,
}

impl TemplatePlanner {
    /// Creates a planner from template lines.
    #[must_use]
    pub const fn new(templates: Vec<PlanTemplate>) -> Self {
        Self { templates }
    }

    /// Every first-class metric, asked of the same `sources`.
    #[must_use]
    pub fn for_metrics(metrics: &[Metric], sources: &[&str]) -> Self {
        let sources: Vec<String> = sources.iter().map(|s| (*s).to_string()).collect();
        Self::new(
            metrics
                .iter()
                .map(|m| PlanTemplate {
                    metric: m.clone(),
                    sources: sources.clone(),
                })
                .collect(),
        )
    }

    /// Template lines.
    #[must_use]
    pub fn templates(&self) -> &[PlanTemplate] {
        &self.templates
    }
}

#[async_trait]
impl Planner for TemplatePlanner {
    fn name(&self) -> &str {
        "template"
    }

    async fn plan(&self, entity: &GeoEntity, registry: &GeoRegistry) -> Result<Vec<ResearchQuery>, PlannerError> {
        let place = registry
            .qualified_name(&entity.id)
            .unwrap_or_else(|| entity.name.clone());
        let mut queries = Vec::new();
        for template in &self.templates {
            let text = format!("{} in {place}", template.metric.label());
            if template.sources.is_empty() {
                queries.push(ResearchQuery::new(text, template.metric.clone()));
                continue;
            }
            for source in &template.sources {
                queries.push(
                    ResearchQuery::new(format!("{text} site:{source}"), template.metric.clone())
                        .with_source_hint(source.clone()),
                );
            }
        }
        Ok(queries)
    }
}
