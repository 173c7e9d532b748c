//! Deterministic search provider that answers from recorded rules.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{SearchHit, SearchProvider, SearchResponse};
use crate::error::QueryFailure;

/// One recorded answer.
///
/// A rule matches a query when every keyword occurs in it, ignoring case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayRule {
    /// Keywords that must all appear in the query.
    pub keywords: Vec<String>,
    /// Response returned on a match.
    #[serde(default)]
    pub response: Option<SearchResponse>,
    /// Transport error returned on a match instead of a response.
    #[serde(default)]
    pub error: Option<String>,
    /// Delay before answering.
    #[serde(default)]
    pub delay_ms: u64,
}

impl ReplayRule {
    fn matches(&self, query: &str) -> bool {
        self.keywords
            .iter()
            .all(|k| query.contains(&k.to_lowercase()))
    }
}

/// Search provider backed by a first-match rule list.
///
/// Queries that match no rule get an empty response.
///
/// # Examples
///
/// ```
/// use market_consensus::search::{ReplaySearchProvider, SearchProvider};
///
/// # tokio_test_block(async {
/// let provider = ReplaySearchProvider::new()
///     .hit(&["rent", "springfield"], "https://zillow.com/x", "Median rent $1,650 as of Oct 2024");
/// let response = provider.search("median rent Springfield site:zillow.com").await.unwrap();
/// assert_eq!(response.results.len(), 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ReplaySearchProvider {
    rules: Vec<ReplayRule>,
    seen: Mutex<Vec<String>>,
}

impl ReplaySearchProvider {
    /// Creates a provider with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider from recorded rules.
    #[must_use]
    pub fn from_rules(rules: Vec<ReplayRule>) -> Self {
        Self {
            rules,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Adds a rule answering with `response`.
    #[must_use]
    pub fn rule(mut self, keywords: &[&str], response: SearchResponse) -> Self {
        self.rules.push(ReplayRule {
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            response: Some(response),
            ..ReplayRule::default()
        });
        self
    }

    /// Adds a rule answering with a single document.
    #[must_use]
    pub fn hit(self, keywords: &[&str], url: &str, snippet: &str) -> Self {
        self.rule(
            keywords,
            SearchResponse {
                results: vec![SearchHit {
                    url: url.to_string(),
                    snippet: snippet.to_string(),
                    ..SearchHit::default()
                }],
                ..SearchResponse::default()
            },
        )
    }

    /// Adds a rule that fails with a transport error.
    #[must_use]
    pub fn failing(mut self, keywords: &[&str], message: &str) -> Self {
        self.rules.push(ReplayRule {
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            error: Some(message.to_string()),
            ..ReplayRule::default()
        });
        self
    }

    /// Adds a rule that answers with `response` after `delay`.
    #[must_use]
    pub fn delayed(mut self, keywords: &[&str], delay: Duration, response: SearchResponse) -> Self {
        self.rules.push(ReplayRule {
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            response: Some(response),
            error: None,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        });
        self
    }

    /// Queries received so far, in arrival order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SearchProvider for ReplaySearchProvider {
    fn name(&self) -> &str {
        "replay"
    }

    async fn search(&self, query: &str) -> Result<SearchResponse, QueryFailure> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.to_string());

        let lowered = query.to_lowercase();
        let Some(rule) = self.rules.iter().find(|r| r.matches(&lowered)) else {
            return Ok(SearchResponse::default());
        };

        if rule.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(rule.delay_ms)).await;
        }
        if let Some(message) = &rule.error {
            return Err(QueryFailure::Transport {
                message: message.clone(),
            });
        }
        Ok(rule.response.clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let provider = ReplaySearchProvider::new()
            .hit(&["rent"], "https://a.com/1", "first")
            .hit(&["rent", "springfield"], "https://b.com/2", "second");
        let response = provider.search("Median RENT Springfield").await.unwrap();
        assert_eq!(response.best().unwrap().snippet, "first");
        assert_eq!(provider.queries(), vec!["Median RENT Springfield".to_string()]);
    }

    #[tokio::test]
    async fn unmatched_query_is_empty() {
        let provider = ReplaySearchProvider::new().hit(&["rent"], "https://a.com/1", "x");
        let response = provider.search("vacancy rate").await.unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn failing_rule_returns_transport_error() {
        let provider = ReplaySearchProvider::new().failing(&["price"], "connection reset");
        let err = provider.search("median home price").await.unwrap_err();
        assert!(matches!(err, QueryFailure::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn rules_deserialize_from_json() {
        let json = r#"[{"keywords": ["rent"], "response": {"results": [{"url": "https://zillow.com"}]}},
                       {"keywords": ["tax"], "error": "boom", "delay_ms": 5}]"#;
        let rules: Vec<ReplayRule> = serde_json::from_str(json).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].delay_ms, 5);
        assert!(rules[0].response.as_ref().unwrap().answer.is_none());
    }
}
