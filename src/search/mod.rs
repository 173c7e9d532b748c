//! The external search/extraction boundary.
//!
//! A provider turns query text into ranked documents plus an optional
//! synthesized answer and structured extraction. Providers may time out or
//! fail; the collector records those as failed queries.

mod replay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueryFailure;

pub use replay::{ReplayRule, ReplaySearchProvider};

/// One ranked document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Document URL; the responding host is resolved from it.
    pub url: String,
    /// Document title.
    #[serde(default)]
    pub title: String,
    /// Snippet or extracted content.
    #[serde(default)]
    pub snippet: String,
    /// Publication or as-of date reported by the provider, if any.
    #[serde(default)]
    pub published: Option<String>,
}

/// Response to one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Synthesized answer text.
    #[serde(default)]
    pub answer: Option<String>,
    /// Ranked documents, best first.
    #[serde(default)]
    pub results: Vec<SearchHit>,
    /// Structured value produced by an extraction step, if any.
    #[serde(default)]
    pub extracted: Option<serde_json::Value>,
}

impl SearchResponse {
    /// The best-ranked document.
    #[must_use]
    pub fn best(&self) -> Option<&SearchHit> {
        self.results.first()
    }

    /// True when the response carries no document.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Search oracle.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Runs one query.
    async fn search(&self, query: &str) -> Result<SearchResponse, QueryFailure>;
}
