//! Finding collection.
//!
//! Issues one search per collection task, concurrently and bounded by a
//! fan-out limit, and turns each best-ranked document into a
//! [`ResearchFinding`]. The responding host is always resolved from the
//! returned URL; the planner's intended source is recorded but never trusted.
//!
//! Failed, timed-out and cancelled queries produce no finding and are
//! reported in the [`CollectionOutcome`]; they never abort collection.

mod extract;
mod topic;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::entity::GeoEntityId;
use crate::error::{ConfigurationError, QueryFailure};
use crate::finding::{effective_weight, FindingId, ResearchFinding, ResearchQuery, WeightClamp};
use crate::metric::Metric;
use crate::recency::{parse_as_of, parse_date, RecencyConfig};
use crate::search::{SearchProvider, SearchResponse};
use crate::source::SourceHost;
use crate::trust::TrustRegistry;

pub use extract::{plausible, RegexValueExtractor, ValueExtractor};
pub use topic::{KeywordTopicPolicy, TopicPolicy, TopicRule};

/// Collector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Maximum concurrent searches.
    pub fan_out: usize,
    /// Per-query timeout.
    pub query_timeout_ms: u64,
    /// Deadline for the whole collection phase of a run, fallback included.
    pub run_timeout_ms: u64,
    /// Bounds for trust x recency.
    pub weight_clamp: WeightClamp,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            fan_out: 8,
            query_timeout_ms: 15_000,
            run_timeout_ms: 120_000,
            weight_clamp: WeightClamp::default(),
        }
    }
}

impl CollectorConfig {
    /// Validates limits and the weight clamp.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidSetting` for a zero fan-out or timeout.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.fan_out == 0 {
            return Err(ConfigurationError::setting("collector.fan_out", "must be at least 1"));
        }
        if self.query_timeout_ms == 0 {
            return Err(ConfigurationError::setting(
                "collector.query_timeout_ms",
                "must be positive",
            ));
        }
        if self.run_timeout_ms == 0 {
            return Err(ConfigurationError::setting(
                "collector.run_timeout_ms",
                "must be positive",
            ));
        }
        self.weight_clamp.validate()
    }

    /// Per-query timeout.
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Run deadline duration.
    #[must_use]
    pub const fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }
}

/// One search to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionTask {
    /// Entity the value will be attributed to.
    pub entity: GeoEntityId,
    /// Entity actually researched.
    pub queried_entity: GeoEntityId,
    /// Metric to collect.
    pub metric: Metric,
    /// The query to send.
    pub query: ResearchQuery,
    /// Fallback level (0 = direct).
    pub fallback_depth: u8,
}

/// A query that produced no finding because it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedQuery {
    /// Entity the query was for.
    pub entity: GeoEntityId,
    /// Metric the query was for.
    pub metric: Metric,
    /// Query text.
    pub query: String,
    /// Why it failed.
    pub failure: QueryFailure,
}

/// Result of one collection pass.
#[derive(Debug, Clone, Default)]
pub struct CollectionOutcome {
    /// Findings, usable or not, sorted for stable output.
    pub findings: Vec<ResearchFinding>,
    /// Queries issued.
    pub attempted: usize,
    /// Queries that returned a response, with or without a document.
    pub successful: usize,
    /// Queries that failed, timed out or were cancelled.
    pub failed: Vec<FailedQuery>,
}

impl CollectionOutcome {
    /// Failures caused by the run deadline.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.failed.iter().filter(|f| f.failure.is_cancelled()).count()
    }

    /// Findings whose response was about a different kind of metric.
    #[must_use]
    pub fn topic_mismatches(&self) -> usize {
        self.findings.iter().filter(|f| f.topic_mismatch).count()
    }
}

/// Executes collection tasks against a search provider.
pub struct FindingCollector {
    search: Arc<dyn SearchProvider>,
    trust: Arc<dyn TrustRegistry>,
    topic: Arc<dyn TopicPolicy>,
    extractor: Arc<dyn ValueExtractor>,
    recency: RecencyConfig,
    config: CollectorConfig,
}

impl std::fmt::Debug for FindingCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FindingCollector")
            .field("search", &self.search.name())
            .field("trust", &self.trust.name())
            .field("topic", &self.topic.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

enum TaskResult {
    Found(Box<ResearchFinding>),
    Empty,
    Failed(FailedQuery),
}

impl FindingCollector {
    /// Creates a collector with the default topic policy and extractor.
    #[must_use]
    pub fn new(
        search: Arc<dyn SearchProvider>,
        trust: Arc<dyn TrustRegistry>,
        recency: RecencyConfig,
        config: CollectorConfig,
    ) -> Self {
        Self {
            search,
            trust,
            topic: Arc::new(KeywordTopicPolicy::default()),
            extractor: Arc::new(RegexValueExtractor),
            recency,
            config,
        }
    }

    /// Replaces the topic policy.
    #[must_use]
    pub fn with_topic_policy(mut self, topic: Arc<dyn TopicPolicy>) -> Self {
        self.topic = topic;
        self
    }

    /// Replaces the value extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn ValueExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Collector settings.
    #[must_use]
    pub const fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Runs every task, at most `fan_out` at a time, until `deadline`.
    ///
    /// Tasks still pending or in flight at the deadline fail as
    /// [`QueryFailure::Cancelled`]; completed findings are kept.
    pub async fn collect(
        &self,
        tasks: Vec<CollectionTask>,
        deadline: Instant,
        now: DateTime<Utc>,
    ) -> CollectionOutcome {
        let attempted = tasks.len();
        let results: Vec<TaskResult> = stream::iter(tasks)
            .map(|task| self.run_task(task, deadline, now))
            .buffer_unordered(self.config.fan_out.max(1))
            .collect()
            .await;

        let mut outcome = CollectionOutcome {
            attempted,
            ..CollectionOutcome::default()
        };
        for result in results {
            match result {
                TaskResult::Found(finding) => {
                    outcome.successful += 1;
                    outcome.findings.push(*finding);
                }
                TaskResult::Empty => outcome.successful += 1,
                TaskResult::Failed(failed) => outcome.failed.push(failed),
            }
        }
        outcome.findings.sort_by(|a, b| {
            (a.entity, &a.metric, a.fallback_depth, &a.actual_source_host, &a.url).cmp(&(
                b.entity,
                &b.metric,
                b.fallback_depth,
                &b.actual_source_host,
                &b.url,
            ))
        });
        outcome
    }

    async fn run_task(&self, task: CollectionTask, deadline: Instant, now: DateTime<Utc>) -> TaskResult {
        match self.search_with_deadline(&task.query.text, deadline).await {
            Ok(response) => match self.build_finding(&task, &response, now) {
                Some(finding) => TaskResult::Found(Box::new(finding)),
                None => TaskResult::Empty,
            },
            Err(failure) => {
                if failure.is_cancelled() {
                    debug!(query = %task.query.text, metric = %task.metric, "Query cancelled by run deadline");
                } else {
                    warn!(query = %task.query.text, metric = %task.metric, error = %failure, "Query failed");
                }
                TaskResult::Failed(FailedQuery {
                    entity: task.entity,
                    metric: task.metric,
                    query: task.query.text,
                    failure,
                })
            }
        }
    }

    async fn search_with_deadline(
        &self,
        query: &str,
        deadline: Instant,
    ) -> Result<SearchResponse, QueryFailure> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(QueryFailure::Cancelled);
        }
        let per_query = self.config.query_timeout();
        let limit = per_query.min(remaining);

        match tokio::time::timeout(limit, self.search.search(query)).await {
            Ok(result) => result,
            Err(_) if remaining <= per_query => Err(QueryFailure::Cancelled),
            Err(_) => Err(QueryFailure::Timeout {
                duration_ms: self.config.query_timeout_ms,
            }),
        }
    }

    /// Turns a response into a finding; `None` when it carries no document.
    fn build_finding(
        &self,
        task: &CollectionTask,
        response: &SearchResponse,
        now: DateTime<Utc>,
    ) -> Option<ResearchFinding> {
        let best = response.best()?;
        let today = now.date_naive();

        let actual = SourceHost::from_url_lossy(&best.url);
        let intended = task
            .query
            .intended_source_hint
            .as_deref()
            .and_then(|hint| SourceHost::parse(hint).ok());
        if let Some(intended) = intended.as_ref().filter(|i| **i != actual) {
            debug!(intended = %intended, actual = %actual, metric = %task.metric, "Source substituted by search provider");
        }

        let answer = response.answer.as_deref().unwrap_or_default();
        let text = [answer, best.title.as_str(), best.snippet.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");

        let extracted_value = response
            .extracted
            .as_ref()
            .and_then(|raw| self.extractor.extract_structured(&task.metric, raw))
            .or_else(|| self.extractor.extract_text(&task.metric, answer))
            .or_else(|| self.extractor.extract_text(&task.metric, &best.snippet));

        let observed_at = observed_at(
            best.published.as_deref(),
            &[answer, best.snippet.as_str(), best.title.as_str()],
            today,
        );
        let topic_mismatch = self.topic.is_mismatch(task.metric.category(), &text);
        if topic_mismatch {
            debug!(host = %actual, metric = %task.metric, "Topic mismatch detected");
        }

        let has_usable_data = extracted_value.is_some();
        let trust_weight = self.trust.weight_for(&actual);
        let recency_weight = self.recency.weight(observed_at, &task.metric, today);
        let clamp = self.config.weight_clamp;

        let payload = if best.snippet.trim().is_empty() {
            answer.to_string()
        } else {
            best.snippet.clone()
        };

        Some(ResearchFinding {
            id: FindingId::new(),
            query: task.query.clone(),
            entity: task.entity,
            queried_entity: task.queried_entity,
            metric: task.metric.clone(),
            actual_source_host: actual,
            intended_source_host: intended,
            url: Some(best.url.clone()),
            extracted_value,
            has_usable_data,
            observed_at,
            collected_at: now,
            topic_mismatch,
            mirrored_from_hosts: BTreeSet::new(),
            mirror_of: None,
            payload,
            trust_weight,
            recency_weight,
            raw_weight: clamp.apply(trust_weight * recency_weight),
            effective_weight: effective_weight(has_usable_data, topic_mismatch, trust_weight, recency_weight, clamp),
            fallback_depth: task.fallback_depth,
        })
    }
}

/// As-of date: the provider's own date field wins, then dates in the text.
fn observed_at(published: Option<&str>, texts: &[&str], today: NaiveDate) -> Option<NaiveDate> {
    published
        .and_then(|p| parse_date(p, today))
        .or_else(|| texts.iter().find_map(|t| parse_as_of(t, today)))
}
