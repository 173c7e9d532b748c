//! Consensus aggregation.
//!
//! Combines the surviving findings for one (entity, metric) pair into a
//! single value plus a confidence classification. The value is the weighted
//! mean of contributing findings, or the weighted median when sources spread
//! further apart than the metric's tolerance. All combination is over sums
//! and sorted values, so the arrival order of findings never matters.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::confidence::{ConfidenceLevel, ConfidenceScore};
use crate::entity::GeoEntityId;
use crate::error::ConfigurationError;
use crate::fallback::FallbackLevel;
use crate::finding::ResearchFinding;
use crate::metric::{Metric, MetricCategory};
use crate::source::SourceHost;
use crate::validation::{Severity, SeverityPenalties, ValidationWarning};

/// Fallback depth recorded on data gaps: the whole chain was exhausted.
pub const GAP_DEPTH: u8 = 4;

/// Caller's investment focus; tightens tolerances on the metrics it cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
    /// No metric is favoured.
    #[default]
    Balanced,
    /// Rent, rates and vacancy matter most.
    CashFlow,
    /// Prices and growth matter most.
    Appreciation,
}

impl RiskProfile {
    /// Multiplier on the spread tolerance for a metric category.
    #[must_use]
    pub const fn tolerance_factor(self, category: MetricCategory) -> f64 {
        match (self, category) {
            (Self::CashFlow, MetricCategory::Rent | MetricCategory::Rate) => 0.67,
            (Self::CashFlow, MetricCategory::Vacancy) => 0.8,
            (Self::Appreciation, MetricCategory::Price | MetricCategory::Growth) => 0.67,
            _ => 1.0,
        }
    }
}

/// Aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Relative spread (max - min) / |mean| above which the median is used.
    pub spread_tolerance: f64,
    /// Per-metric tolerance overrides.
    pub metric_tolerances: BTreeMap<Metric, f64>,
    /// Caller's risk profile.
    pub risk_profile: RiskProfile,
    /// Agreeing independent sources needed for HIGH confidence.
    pub high_confidence_sources: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        let metric_tolerances = [
            (Metric::VacancyRate, 0.25),
            (Metric::RentGrowthYoy, 0.5),
            (Metric::PriceGrowthYoy, 0.5),
            (Metric::DaysOnMarket, 0.25),
        ]
        .into_iter()
        .collect();
        Self {
            spread_tolerance: 0.15,
            metric_tolerances,
            risk_profile: RiskProfile::Balanced,
            high_confidence_sources: 3,
        }
    }
}

impl AggregationConfig {
    /// Validates tolerances and the HIGH threshold.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidSetting` for a non-positive tolerance
    /// or a zero source threshold.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let overrides = self
            .metric_tolerances
            .iter()
            .map(|(m, t)| (format!("aggregation.metric_tolerances.{m}"), *t));
        for (field, tolerance) in
            std::iter::once(("aggregation.spread_tolerance".to_string(), self.spread_tolerance)).chain(overrides)
        {
            if !(tolerance > 0.0 && tolerance.is_finite()) {
                return Err(ConfigurationError::setting(field, format!("{tolerance} must be positive")));
            }
        }
        if self.high_confidence_sources == 0 {
            return Err(ConfigurationError::setting(
                "aggregation.high_confidence_sources",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Effective tolerance for `metric` after the risk profile.
    #[must_use]
    pub fn tolerance_for(&self, metric: &Metric) -> f64 {
        let base = self
            .metric_tolerances
            .get(metric)
            .copied()
            .unwrap_or(self.spread_tolerance);
        base * self.risk_profile.tolerance_factor(metric.category())
    }
}

/// How the consensus value was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    /// Weighted mean.
    WeightedMean,
    /// Weighted median, used when sources disagree.
    WeightedMedian,
    /// No value.
    None,
}

/// The engine's answer for one (entity, metric) pair.
///
/// Recomputed on every run, never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusMetricValue {
    /// Entity the value is for.
    pub entity: GeoEntityId,
    /// Metric the value is for.
    pub metric: Metric,
    /// Consensus value; absent for data gaps.
    pub value: Option<f64>,
    /// Coarse confidence.
    pub confidence: ConfidenceLevel,
    /// Numeric confidence behind the level.
    pub score: ConfidenceScore,
    /// Independent (post-dedup) sources agreeing with the value.
    pub sources_count: usize,
    /// 0 for a direct hit, 1-4 for the fallback level used.
    pub fallback_depth: u8,
    /// How the value was computed.
    pub method: AggregationMethod,
    /// Hosts of the agreeing sources.
    pub hosts: BTreeSet<SourceHost>,
    /// Everything that degraded confidence.
    pub warnings: Vec<String>,
}

impl ConsensusMetricValue {
    /// True when no usable data existed at any depth.
    #[must_use]
    pub fn is_gap(&self) -> bool {
        self.value.is_none()
    }
}

impl fmt::Display for ConsensusMetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(v) => write!(
                f,
                "{} = {v:.2} [{} {}, {} source(s), depth {}]",
                self.metric, self.confidence, self.score, self.sources_count, self.fallback_depth
            ),
            None => write!(f, "{} = gap [{}]", self.metric, self.confidence),
        }
    }
}

/// Weighted mean of `(value, weight)` samples; `None` if total weight is zero.
#[must_use]
pub fn weighted_mean(samples: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = samples.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    Some(samples.iter().map(|(v, w)| v * w).sum::<f64>() / total)
}

/// Weighted median of `(value, weight)` samples.
///
/// The smallest value at which cumulative weight reaches half the total.
///
/// # Examples
///
/// ```
/// use market_consensus::consensus::weighted_median;
///
/// assert_eq!(weighted_median(&[(1200.0, 0.2), (1650.0, 0.95)]), Some(1650.0));
/// assert_eq!(weighted_median(&[]), None);
/// ```
#[must_use]
pub fn weighted_median(samples: &[(f64, f64)]) -> Option<f64> {
    let mut sorted: Vec<(f64, f64)> = samples.iter().copied().filter(|(_, w)| *w > 0.0).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    let half = sorted.iter().map(|(_, w)| w).sum::<f64>() / 2.0;
    let mut cumulative = 0.0;
    for (value, weight) in &sorted {
        cumulative += weight;
        if cumulative >= half {
            return Some(*value);
        }
    }
    sorted.last().map(|(v, _)| *v)
}

/// Smallest and largest sample value.
fn bounds(samples: &[(f64, f64)]) -> (f64, f64) {
    samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (v, _)| (lo.min(*v), hi.max(*v)))
}

/// Findings at the shallowest fallback depth present, with that depth.
fn shallowest(pool: Vec<&ResearchFinding>) -> (Vec<&ResearchFinding>, u8) {
    let depth = pool.iter().map(|f| f.fallback_depth).min().unwrap_or(0);
    (pool.into_iter().filter(|f| f.fallback_depth == depth).collect(), depth)
}

/// (value, weight) pairs; mismatch-only pools weigh by raw weight.
fn samples_of(pool: &[&ResearchFinding], mismatch_only: bool) -> Vec<(f64, f64)> {
    pool.iter()
        .filter_map(|f| {
            let weight = if mismatch_only { f.raw_weight } else { f.effective_weight };
            f.value().map(|v| (v, weight))
        })
        .collect()
}

/// Combines findings into consensus values.
#[derive(Debug, Clone)]
pub struct ConsensusAggregator {
    config: AggregationConfig,
    penalties: SeverityPenalties,
    fallback_multiplier: f64,
    stale_horizon_days: u32,
}

impl Default for ConsensusAggregator {
    fn default() -> Self {
        Self::new(AggregationConfig::default())
    }
}

impl ConsensusAggregator {
    /// Creates an aggregator with default penalties, a 0.5 fallback multiplier
    /// and a 365-day stale horizon.
    #[must_use]
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            config,
            penalties: SeverityPenalties::default(),
            fallback_multiplier: 0.5,
            stale_horizon_days: 365,
        }
    }

    /// Sets severity penalties.
    #[must_use]
    pub const fn with_penalties(mut self, penalties: SeverityPenalties) -> Self {
        self.penalties = penalties;
        self
    }

    /// Sets the per-depth fallback multiplier.
    #[must_use]
    pub const fn with_fallback_multiplier(mut self, multiplier: f64) -> Self {
        self.fallback_multiplier = multiplier;
        self
    }

    /// Sets the age at which data counts as stale.
    #[must_use]
    pub const fn with_stale_horizon(mut self, days: u32) -> Self {
        self.stale_horizon_days = days;
        self
    }

    /// Aggregation settings.
    #[must_use]
    pub const fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// The value recorded when no level produced usable data.
    #[must_use]
    pub fn gap(entity: GeoEntityId, metric: Metric) -> ConsensusMetricValue {
        ConsensusMetricValue {
            entity,
            metric,
            value: None,
            confidence: ConfidenceLevel::None,
            score: ConfidenceScore::zero(),
            sources_count: 0,
            fallback_depth: GAP_DEPTH,
            method: AggregationMethod::None,
            hosts: BTreeSet::new(),
            warnings: vec!["no usable data at any fallback depth".to_string()],
        }
    }

    /// The value `aggregate` would report from the contributing findings of
    /// one pair, or `None` when nothing contributes.
    ///
    /// Cross-metric rules are evaluated on these values.
    #[must_use]
    pub fn provisional_value(&self, metric: &Metric, findings: &[&ResearchFinding]) -> Option<f64> {
        let contributing: Vec<&ResearchFinding> = findings.iter().copied().filter(|f| f.contributes()).collect();
        if contributing.is_empty() {
            return None;
        }
        let (pool, _) = shallowest(contributing);
        self.point(metric, &samples_of(&pool, false)).map(|(value, _)| value)
    }

    /// Weighted mean, or weighted median once the spread exceeds tolerance.
    fn point(&self, metric: &Metric, samples: &[(f64, f64)]) -> Option<(f64, AggregationMethod)> {
        let mean = weighted_mean(samples)?;
        let tolerance = self.config.tolerance_for(metric);
        let (min, max) = bounds(samples);
        Some(if max <= min {
            // Unanimous: report the observed value itself.
            (min, AggregationMethod::WeightedMean)
        } else if (max - min) / mean.abs().max(f64::EPSILON) > tolerance {
            (weighted_median(samples).unwrap_or(mean), AggregationMethod::WeightedMedian)
        } else {
            (mean, AggregationMethod::WeightedMean)
        })
    }

    /// Aggregates the findings of one pair.
    ///
    /// Only the shallowest fallback depth with contributing findings is used.
    /// If nothing contributes but topic-mismatched findings carry data, they
    /// are combined by raw weight and capped at LOW. Otherwise the pair is a gap.
    #[must_use]
    pub fn aggregate(
        &self,
        entity: GeoEntityId,
        metric: &Metric,
        findings: &[&ResearchFinding],
        warnings: &[ValidationWarning],
        today: NaiveDate,
    ) -> ConsensusMetricValue {
        let contributing: Vec<&ResearchFinding> = findings.iter().copied().filter(|f| f.contributes()).collect();

        let (pool, mismatch_only) = if contributing.is_empty() {
            let mismatched: Vec<&ResearchFinding> = findings
                .iter()
                .copied()
                .filter(|f| f.is_independent() && f.topic_mismatch && f.extracted_value.is_some() && f.raw_weight > 0.0)
                .collect();
            if mismatched.is_empty() {
                return Self::gap(entity, metric.clone());
            }
            (mismatched, true)
        } else {
            (contributing, false)
        };

        let (pool, depth) = shallowest(pool);
        let samples = samples_of(&pool, mismatch_only);
        let Some((value, method)) = self.point(metric, &samples) else {
            return Self::gap(entity, metric.clone());
        };
        let tolerance = self.config.tolerance_for(metric);

        let agrees = |v: f64| (v - value).abs() <= tolerance * value.abs().max(f64::EPSILON);
        let agreeing: Vec<&ResearchFinding> = pool
            .iter()
            .copied()
            .filter(|f| f.value().is_some_and(agrees))
            .collect();
        let dissenting = pool.len() - agreeing.len();

        let mut notes: Vec<String> = warnings.iter().map(ToString::to_string).collect();
        if dissenting > 0 {
            notes.push(format!(
                "{dissenting} source(s) disagree with the consensus by more than {:.0}%",
                tolerance * 100.0
            ));
        }
        if mismatch_only {
            notes.push("value derived only from topic-mismatched sources".to_string());
        } else {
            let ignored = findings
                .iter()
                .filter(|f| f.is_independent() && f.topic_mismatch && f.extracted_value.is_some())
                .count();
            if ignored > 0 {
                notes.push(format!("{ignored} topic-mismatched source(s) ignored"));
            }
        }
        if depth > 0 {
            let level = FallbackLevel::CHAIN
                .iter()
                .find(|l| l.depth() == depth)
                .map_or_else(|| "fallback".to_string(), ToString::to_string);
            notes.push(format!("filled from fallback level {level} (depth {depth})"));
        }

        let horizon = i64::from(self.stale_horizon_days);
        let all_stale = agreeing.iter().all(|f| {
            f.observed_at
                .is_some_and(|d| (today - d).num_days() >= horizon)
        });
        if all_stale {
            notes.push(format!("all supporting data is older than {horizon} days"));
        }
        let all_fresh = agreeing.iter().all(|f| f.recency_weight >= 1.0);

        let rule_level = if mismatch_only
            || all_stale
            || (agreeing.len() <= 1 && !warnings.is_empty())
        {
            ConfidenceLevel::Low
        } else if agreeing.len() >= self.config.high_confidence_sources && all_fresh && warnings.is_empty() {
            ConfidenceLevel::High
        } else {
            ConfidenceLevel::Medium
        };

        let score = self.score(rule_level, warnings, depth);
        let confidence = rule_level
            .capped_at(score.level())
            .capped_at(Self::caps(warnings, depth, mismatch_only))
            .max(ConfidenceLevel::Low);

        ConsensusMetricValue {
            entity,
            metric: metric.clone(),
            value: Some(value),
            confidence,
            score,
            sources_count: agreeing.len(),
            fallback_depth: depth,
            method,
            hosts: agreeing.iter().map(|f| f.actual_source_host.clone()).collect(),
            warnings: notes,
        }
    }

    fn score(&self, level: ConfidenceLevel, warnings: &[ValidationWarning], depth: u8) -> ConfidenceScore {
        let penalty: f64 = warnings
            .iter()
            .map(|w| self.penalties.for_severity(w.severity))
            .sum();
        ConfidenceScore::clamped(level.base_score())
            .penalized(penalty, ConfidenceScore::DATA_FLOOR)
            .scaled(
                self.fallback_multiplier.powi(i32::from(depth)),
                ConfidenceScore::DATA_FLOOR,
            )
    }

    fn caps(warnings: &[ValidationWarning], depth: u8, mismatch_only: bool) -> ConfidenceLevel {
        let mut cap = ConfidenceLevel::High;
        if !warnings.is_empty() {
            cap = cap.capped_at(ConfidenceLevel::Medium);
        }
        if warnings.iter().any(|w| w.severity == Severity::Critical) || mismatch_only {
            cap = cap.capped_at(ConfidenceLevel::Low);
        }
        cap = match depth {
            0 => cap,
            1 | 2 => cap.capped_at(ConfidenceLevel::Medium),
            _ => cap.capped_at(ConfidenceLevel::Low),
        };
        cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::fixtures::finding;
    use crate::finding::FindingId;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()
    }

    fn dated(mut f: ResearchFinding, days_ago: i64, recency: f64) -> ResearchFinding {
        f.observed_at = Some(today() - chrono::Duration::days(days_ago));
        f.recency_weight = recency;
        f
    }

    fn warning(severity: Severity) -> ValidationWarning {
        ValidationWarning {
            entity: finding("a.com", Metric::MedianRent, 1.0, 1.0, "").entity,
            metric: Metric::MedianRent,
            rule: "rent_price_ratio".to_string(),
            severity,
            message: "ratio out of bounds".to_string(),
        }
    }

    fn run(agg: &ConsensusAggregator, findings: &[ResearchFinding], warnings: &[ValidationWarning]) -> ConsensusMetricValue {
        let refs: Vec<&ResearchFinding> = findings.iter().collect();
        agg.aggregate(findings[0].entity, &findings[0].metric, &refs, warnings, today())
    }

    #[test]
    fn three_fresh_agreeing_sources_are_high() {
        let findings = vec![
            dated(finding("a.com", Metric::MedianRent, 1600.0, 0.9, "a"), 10, 1.0),
            dated(finding("b.com", Metric::MedianRent, 1650.0, 0.8, "b"), 20, 1.0),
            dated(finding("c.com", Metric::MedianRent, 1700.0, 0.7, "c"), 30, 1.0),
        ];
        let v = run(&ConsensusAggregator::default(), &findings, &[]);
        assert_eq!(v.confidence, ConfidenceLevel::High);
        assert_eq!(v.sources_count, 3);
        assert_eq!(v.method, AggregationMethod::WeightedMean);
        assert!((v.score.value() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn wide_spread_uses_weighted_median() {
        let findings = vec![
            dated(finding("a.com", Metric::MedianRent, 1650.0, 0.95, "a"), 30, 1.0),
            dated(finding("c.com", Metric::MedianRent, 1200.0, 0.2, "c"), 400, 0.3),
        ];
        let v = run(&ConsensusAggregator::default(), &findings, &[]);
        assert_eq!(v.value, Some(1650.0));
        assert_eq!(v.method, AggregationMethod::WeightedMedian);
        assert_eq!(v.sources_count, 1);
        assert_eq!(v.confidence, ConfidenceLevel::Medium);
        assert!(v.warnings.iter().any(|w| w.contains("disagree")));
    }

    #[test]
    fn mirrors_are_excluded() {
        let mut mirror = finding("b.com", Metric::MedianRent, 1650.0, 0.95, "a");
        mirror.mirror_of = Some(FindingId::new());
        let findings = vec![finding("a.com", Metric::MedianRent, 1650.0, 0.95, "a"), mirror];
        let v = run(&ConsensusAggregator::default(), &findings, &[]);
        assert_eq!(v.sources_count, 1);
    }

    #[test]
    fn critical_warning_caps_at_low() {
        let findings = vec![
            dated(finding("a.com", Metric::MedianRent, 250.0, 0.9, "a"), 10, 1.0),
            dated(finding("b.com", Metric::MedianRent, 250.0, 0.9, "b"), 10, 1.0),
            dated(finding("c.com", Metric::MedianRent, 250.0, 0.9, "c"), 10, 1.0),
        ];
        let v = run(&ConsensusAggregator::default(), &findings, &[warning(Severity::Critical)]);
        assert_eq!(v.confidence, ConfidenceLevel::Low);
        assert!(!v.warnings.is_empty());
    }

    #[test]
    fn any_warning_caps_at_medium() {
        let findings = vec![
            dated(finding("a.com", Metric::MedianRent, 1650.0, 0.9, "a"), 10, 1.0),
            dated(finding("b.com", Metric::MedianRent, 1650.0, 0.9, "b"), 10, 1.0),
            dated(finding("c.com", Metric::MedianRent, 1650.0, 0.9, "c"), 10, 1.0),
        ];
        let v = run(&ConsensusAggregator::default(), &findings, &[warning(Severity::Low)]);
        assert_eq!(v.confidence, ConfidenceLevel::Medium);
    }

    #[test]
    fn stale_data_is_low() {
        let findings = vec![dated(finding("a.com", Metric::MedianRent, 1650.0, 0.9, "a"), 500, 0.3)];
        let v = run(&ConsensusAggregator::default(), &findings, &[]);
        assert_eq!(v.confidence, ConfidenceLevel::Low);
    }

    #[test]
    fn fallback_confidence_never_increases_with_depth() {
        let agg = ConsensusAggregator::default().with_fallback_multiplier(0.9);
        let mut previous = ConfidenceLevel::High;
        let mut previous_score = 1.0;
        for depth in 0..=4 {
            let findings: Vec<_> = ["a.com", "b.com", "c.com"]
                .iter()
                .map(|h| {
                    let mut f = dated(finding(h, Metric::MedianRent, 1650.0, 0.9, h), 10, 1.0);
                    f.fallback_depth = depth;
                    f
                })
                .collect();
            let v = run(&agg, &findings, &[]);
            assert_eq!(v.fallback_depth, depth);
            assert!(v.confidence <= previous);
            assert!(v.score.value() <= previous_score);
            previous = v.confidence;
            previous_score = v.score.value();
        }
        assert_eq!(previous, ConfidenceLevel::Low);
    }

    #[test]
    fn shallowest_depth_wins() {
        let mut deep = finding("b.com", Metric::MedianRent, 900.0, 0.9, "b");
        deep.fallback_depth = 3;
        let findings = vec![finding("a.com", Metric::MedianRent, 1650.0, 0.5, "a"), deep];
        let v = run(&ConsensusAggregator::default(), &findings, &[]);
        assert_eq!(v.value, Some(1650.0));
        assert_eq!(v.fallback_depth, 0);
    }

    #[test]
    fn mismatch_only_is_low_not_gap() {
        let mut f = finding("a.com", Metric::MedianHomePrice, 185_000.0, 0.8, "a");
        f.topic_mismatch = true;
        f.effective_weight = 0.0;
        let v = run(&ConsensusAggregator::default(), &[f], &[]);
        assert_eq!(v.confidence, ConfidenceLevel::Low);
        assert_eq!(v.value, Some(185_000.0));
    }

    #[test]
    fn ignored_mismatched_sources_are_noted() {
        let mut off_topic = finding("b.com", Metric::MedianHomePrice, 1_400.0, 0.9, "b");
        off_topic.topic_mismatch = true;
        off_topic.effective_weight = 0.0;
        let findings = [finding("a.com", Metric::MedianHomePrice, 185_000.0, 0.8, "a"), off_topic];
        let v = run(&ConsensusAggregator::default(), &findings, &[]);
        assert_eq!(v.value, Some(185_000.0));
        assert_eq!(v.sources_count, 1);
        assert!(v.warnings.iter().any(|w| w == "1 topic-mismatched source(s) ignored"));
    }

    #[test]
    fn provisional_value_follows_median_selection() {
        let findings = [
            finding("a.com", Metric::MedianRent, 1650.0, 0.95, "a"),
            finding("b.com", Metric::MedianRent, 300.0, 0.2, "b"),
        ];
        let agg = ConsensusAggregator::default();
        let refs: Vec<&ResearchFinding> = findings.iter().collect();
        let reported = run(&agg, &findings, &[]);
        assert_eq!(reported.method, AggregationMethod::WeightedMedian);
        assert_eq!(agg.provisional_value(&Metric::MedianRent, &refs), reported.value);
        assert_eq!(reported.value, Some(1650.0));
    }

    #[test]
    fn provisional_value_skips_mismatch_only_pairs() {
        let mut f = finding("a.com", Metric::MedianHomePrice, 185_000.0, 0.8, "a");
        f.topic_mismatch = true;
        f.effective_weight = 0.0;
        assert_eq!(ConsensusAggregator::default().provisional_value(&Metric::MedianHomePrice, &[&f]), None);
    }

    #[test]
    fn unusable_findings_make_a_gap() {
        let mut f = finding("a.com", Metric::VacancyRate, 0.0, 0.8, "a");
        f.extracted_value = None;
        f.has_usable_data = false;
        f.effective_weight = 0.0;
        let v = run(&ConsensusAggregator::default(), &[f], &[]);
        assert!(v.is_gap());
        assert_eq!(v.confidence, ConfidenceLevel::None);
        assert_eq!(v.fallback_depth, GAP_DEPTH);
    }

    #[test]
    fn order_does_not_matter() {
        let findings = vec![
            finding("a.com", Metric::MedianRent, 1500.0, 0.9, "a"),
            finding("b.com", Metric::MedianRent, 1650.0, 0.5, "b"),
            finding("c.com", Metric::MedianRent, 2400.0, 0.3, "c"),
        ];
        let mut reversed = findings.clone();
        reversed.reverse();
        let agg = ConsensusAggregator::default();
        assert_eq!(run(&agg, &findings, &[]).value, run(&agg, &reversed, &[]).value);
    }

    #[test]
    fn risk_profile_tightens_tolerance() {
        let mut config = AggregationConfig::default();
        let balanced = config.tolerance_for(&Metric::MedianRent);
        config.risk_profile = RiskProfile::CashFlow;
        assert!(config.tolerance_for(&Metric::MedianRent) < balanced);
        assert!((config.tolerance_for(&Metric::MedianHomePrice) - 0.15).abs() < 1e-12);
        config.risk_profile = RiskProfile::Appreciation;
        assert!(config.tolerance_for(&Metric::MedianHomePrice) < 0.15);
    }

    #[test]
    fn config_validation() {
        let mut config = AggregationConfig::default();
        assert!(config.validate().is_ok());
        config.spread_tolerance = 0.0;
        assert!(config.validate().is_err());
        let mut config = AggregationConfig::default();
        config.high_confidence_sources = 0;
        assert!(config.validate().is_err());
    }
}
