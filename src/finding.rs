//! Research queries and the findings collected for them.
//!
//! A finding is one (query, source) observation. It is created by the
//! collector, annotated in place by the deduplicator and validator during a
//! single run, and discarded after aggregation.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::GeoEntityId;
use crate::error::ConfigurationError;
use crate::metric::Metric;
use crate::source::SourceHost;
use crate::value::ExtractedValue;

/// One research query produced by a planner.
///
/// Queries without a target metric are dropped before collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchQuery {
    /// Query text sent to the search provider.
    pub text: String,
    /// Metric the query is meant to answer.
    pub target_metric: Option<Metric>,
    /// Source the planner intended to reach, e.g. "zillow.com".
    pub intended_source_hint: Option<String>,
    /// Free-form hint for cross-checking the answer.
    pub validation_hint: Option<String>,
}

impl ResearchQuery {
    /// Creates a query targeting `metric`.
    #[must_use]
    pub fn new(text: impl Into<String>, metric: Metric) -> Self {
        Self {
            text: text.into(),
            target_metric: Some(metric),
            intended_source_hint: None,
            validation_hint: None,
        }
    }

    /// Sets the intended source hint.
    #[must_use]
    pub fn with_source_hint(mut self, hint: impl Into<String>) -> Self {
        self.intended_source_hint = Some(hint.into());
        self
    }

    /// Sets the validation hint.
    #[must_use]
    pub fn with_validation_hint(mut self, hint: impl Into<String>) -> Self {
        self.validation_hint = Some(hint.into());
        self
    }
}

/// Identifier of a finding within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingId(Uuid);

impl FindingId {
    /// Creates a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FindingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounds applied to trust x recency for usable findings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightClamp {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl Default for WeightClamp {
    fn default() -> Self {
        Self { min: 0.2, max: 1.0 }
    }
}

impl WeightClamp {
    /// Checks `0 <= min <= max <= 1`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidSetting` otherwise.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(0.0..=1.0).contains(&self.min) || !(0.0..=1.0).contains(&self.max) || self.min > self.max {
            return Err(ConfigurationError::setting(
                "collector.weight_clamp",
                format!("[{}, {}] is not a sub-range of [0, 1]", self.min, self.max),
            ));
        }
        Ok(())
    }

    /// Clamps `raw` into the bounds.
    #[must_use]
    pub fn apply(&self, raw: f64) -> f64 {
        if raw.is_nan() {
            self.min
        } else {
            raw.clamp(self.min, self.max)
        }
    }
}

/// Weight of a finding in consensus.
///
/// Zero whenever the finding has no usable data or answers the wrong topic;
/// otherwise trust x recency clamped into `clamp`.
///
/// # Examples
///
/// ```
/// use market_consensus::finding::{effective_weight, WeightClamp};
///
/// let clamp = WeightClamp::default();
/// assert_eq!(effective_weight(true, false, 0.95, 1.0, clamp), 0.95);
/// assert_eq!(effective_weight(true, false, 0.3, 0.3, clamp), 0.2);
/// assert_eq!(effective_weight(false, false, 0.95, 1.0, clamp), 0.0);
/// assert_eq!(effective_weight(true, true, 0.95, 1.0, clamp), 0.0);
/// ```
#[must_use]
pub fn effective_weight(
    has_usable_data: bool,
    topic_mismatch: bool,
    trust: f64,
    recency: f64,
    clamp: WeightClamp,
) -> f64 {
    if !has_usable_data || topic_mismatch {
        return 0.0;
    }
    clamp.apply(trust * recency)
}

/// One (query, source) observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchFinding {
    /// Id within the run.
    pub id: FindingId,
    /// The query that produced this finding.
    pub query: ResearchQuery,
    /// Entity the value is attributed to.
    pub entity: GeoEntityId,
    /// Entity actually researched; differs from `entity` for fallback findings.
    pub queried_entity: GeoEntityId,
    /// Metric the value is for.
    pub metric: Metric,
    /// Host that actually answered, resolved from the returned URL.
    pub actual_source_host: SourceHost,
    /// Host the planner intended to reach.
    pub intended_source_host: Option<SourceHost>,
    /// URL of the best-ranked document.
    pub url: Option<String>,
    /// Value extracted from the response.
    pub extracted_value: Option<ExtractedValue>,
    /// Whether a value could be extracted.
    pub has_usable_data: bool,
    /// As-of date of the data.
    pub observed_at: Option<NaiveDate>,
    /// When the finding was collected.
    pub collected_at: DateTime<Utc>,
    /// The response talks about a different kind of metric than requested.
    pub topic_mismatch: bool,
    /// Hosts whose identical payload was collapsed into this finding.
    pub mirrored_from_hosts: BTreeSet<SourceHost>,
    /// Set when this finding is a mirror of another.
    pub mirror_of: Option<FindingId>,
    /// Text the value was extracted from; used for mirror detection.
    pub payload: String,
    /// Trust of `actual_source_host` at collection time.
    pub trust_weight: f64,
    /// Recency multiplier for `observed_at`.
    pub recency_weight: f64,
    /// Trust x recency, clamped, ignoring usability and topic.
    pub raw_weight: f64,
    /// Weight used in consensus.
    pub effective_weight: f64,
    /// Fallback level that produced this finding (0 = direct).
    pub fallback_depth: u8,
}

impl ResearchFinding {
    /// Whether this finding counts as an independent observation.
    #[must_use]
    pub fn is_independent(&self) -> bool {
        self.mirror_of.is_none()
    }

    /// Whether this finding may contribute to a consensus value.
    #[must_use]
    pub fn contributes(&self) -> bool {
        self.is_independent() && self.effective_weight > 0.0 && self.extracted_value.is_some()
    }

    /// Point value of the extraction.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        self.extracted_value.as_ref().map(ExtractedValue::point)
    }

    /// Whether this finding came from the entity itself rather than a fallback.
    #[must_use]
    pub const fn is_direct(&self) -> bool {
        self.fallback_depth == 0
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Finding builders shared by unit tests.

    use super::*;
    use crate::entity::GeoLevel;

    pub fn finding(host: &str, metric: Metric, value: f64, weight: f64, payload: &str) -> ResearchFinding {
        let entity = GeoEntityId::derive("Springfield", GeoLevel::City);
        ResearchFinding {
            id: FindingId::new(),
            query: ResearchQuery::new(format!("{metric} Springfield"), metric.clone()),
            entity,
            queried_entity: entity,
            metric,
            actual_source_host: SourceHost::parse(host).unwrap(),
            intended_source_host: None,
            url: Some(format!("https://{host}/springfield")),
            extracted_value: Some(ExtractedValue::numeric(value).unwrap()),
            has_usable_data: true,
            observed_at: None,
            collected_at: Utc::now(),
            topic_mismatch: false,
            mirrored_from_hosts: BTreeSet::new(),
            mirror_of: None,
            payload: payload.to_string(),
            trust_weight: weight,
            recency_weight: 1.0,
            raw_weight: weight,
            effective_weight: weight,
            fallback_depth: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_is_deterministic() {
        let clamp = WeightClamp::default();
        let a = effective_weight(true, false, 0.72, 0.81, clamp);
        let b = effective_weight(true, false, 0.72, 0.81, clamp);
        assert!((a - b).abs() < f64::EPSILON);
        assert!((a - 0.72 * 0.81).abs() < 1e-12);
    }

    #[test]
    fn clamp_validation() {
        assert!(WeightClamp::default().validate().is_ok());
        assert!(WeightClamp { min: 0.8, max: 0.2 }.validate().is_err());
        assert!(WeightClamp { min: -0.1, max: 1.0 }.validate().is_err());
    }

    #[test]
    fn mirrors_do_not_contribute() {
        let mut f = fixtures::finding("zillow.com", Metric::MedianRent, 1650.0, 0.9, "x");
        assert!(f.contributes());
        f.mirror_of = Some(FindingId::new());
        assert!(!f.contributes());
        assert!(!f.is_independent());
    }

    #[test]
    fn query_builder() {
        let q = ResearchQuery::new("median rent Springfield", Metric::MedianRent)
            .with_source_hint("zillow.com")
            .with_validation_hint("monthly");
        assert_eq!(q.target_metric, Some(Metric::MedianRent));
        assert_eq!(q.intended_source_hint.as_deref(), Some("zillow.com"));
    }
}
