//! # market-consensus - Multi-Source Market Data Reconciliation
//!
//! Turns noisy, multi-source research about real-estate market metrics into a
//! single weighted, cross-validated consensus value per metric per
//! geographic entity, with a confidence level and fallback provenance.
//!
//! ## Core Concepts
//!
//! - **Finding**: one (query, source) observation, possibly unusable
//! - **Effective weight**: trust x recency, zeroed on missing or mismatched data
//! - **Mirror**: a finding whose payload duplicates another's (syndication, not corroboration)
//! - **Fallback depth**: how many levels of geographic generalization were needed
//! - **Consensus value**: the final weighted answer for one (entity, metric) pair
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use market_consensus::config::EngineConfig;
//! use market_consensus::entity::{GeoEntitySpec, GeoRegistry};
//! use market_consensus::pipeline::{ReconciliationPipeline, TemplatePlanner};
//! use market_consensus::search::ReplaySearchProvider;
//! use market_consensus::{GeoLevel, Metric};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = GeoRegistry::from_specs(&[
//!     GeoEntitySpec { name: "Springfield".into(), level: GeoLevel::City, parent: Some("Illinois".into()), population: None },
//!     GeoEntitySpec { name: "Illinois".into(), level: GeoLevel::State, parent: None, population: None },
//! ])?;
//! let springfield = registry.find("Springfield", GeoLevel::City).map(|e| e.id).ok_or("missing")?;
//!
//! let search = ReplaySearchProvider::new()
//!     .hit(&["median rent"], "https://www.zillow.com/springfield", "Median rent is $1,650 as of October 2024.");
//! let planner = TemplatePlanner::for_metrics(&[Metric::MedianRent], &["zillow.com"]);
//! let pipeline = ReconciliationPipeline::from_config(
//!     EngineConfig::default(),
//!     registry,
//!     Arc::new(planner),
//!     Arc::new(search),
//!     None,
//! )?;
//!
//! let report = pipeline.run(&[springfield]).await;
//! for value in &report.values {
//!     println!("{value}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod confidence;
pub mod entity;
pub mod error;
pub mod metric;
pub mod source;
pub mod value;

// Weighting and collection
pub mod collector;
pub mod finding;
pub mod recency;
pub mod search;
pub mod trust;

// Reconciliation
pub mod consensus;
pub mod dedup;
pub mod fallback;
pub mod validation;

// Orchestration, configuration and persistence
pub mod config;
pub mod pipeline;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use confidence::{ConfidenceLevel, ConfidenceScore};
pub use config::EngineConfig;
pub use consensus::{ConsensusAggregator, ConsensusMetricValue, RiskProfile};
pub use entity::{GeoEntity, GeoEntityId, GeoLevel, GeoRegistry};
pub use error::{
    ConfigurationError, ConsensusError, ConsensusResult, PlannerError, QueryFailure, ValidationError,
};
pub use finding::{ResearchFinding, ResearchQuery};
pub use metric::{Metric, MetricCategory};
pub use pipeline::{Diagnostics, PipelineState, ReconciliationPipeline, ReconciliationReport};
pub use recency::RecencyConfig;
pub use search::{SearchHit, SearchProvider, SearchResponse};
pub use source::SourceHost;
pub use storage::{StorageError, TrustStore};
pub use trust::{InMemoryTrustRegistry, SourceTrustRecord, TrustAuditEntry, TrustRegistry};
pub use validation::{Severity, ValidationWarning};
pub use value::ExtractedValue;
