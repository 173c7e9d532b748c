//! Recency weighting.
//!
//! Converts a finding's as-of date plus a per-metric freshness policy into a
//! decay multiplier in `[stale_weight_floor, 1.0]`:
//!
//! - no date: the configured undated weight (0.6 by default)
//! - age within `max_fresh_days`: 1.0
//! - age at or past the stale horizon (365 days): the floor
//! - in between: linear interpolation from 1.0 down to the floor

mod dates;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::metric::Metric;

pub use dates::{parse_as_of, parse_date};

/// Freshness window for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreshnessWindow {
    /// Ages up to this many days count as fully fresh.
    pub max_fresh_days: u32,
    /// Weight applied once data reaches the stale horizon.
    pub stale_weight_floor: f64,
}

impl FreshnessWindow {
    /// Creates a window.
    #[must_use]
    pub const fn new(max_fresh_days: u32, stale_weight_floor: f64) -> Self {
        Self {
            max_fresh_days,
            stale_weight_floor,
        }
    }
}

/// The freshness policy that applies to a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFreshnessPolicy {
    /// Metric the policy applies to.
    pub metric: Metric,
    /// Ages up to this many days count as fully fresh.
    pub max_fresh_days: u32,
    /// Weight applied once data reaches the stale horizon.
    pub stale_weight_floor: f64,
}

/// Recency configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecencyConfig {
    /// Weight for findings without a recognizable as-of date.
    pub undated_weight: f64,
    /// Age in days at which data is fully stale.
    pub stale_horizon_days: u32,
    /// Policy for metrics without their own entry.
    pub default_policy: FreshnessWindow,
    /// Per-metric policies.
    pub policies: BTreeMap<Metric, FreshnessWindow>,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        let policies = [
            (Metric::MedianRent, FreshnessWindow::new(60, 0.3)),
            (Metric::MedianHomePrice, FreshnessWindow::new(90, 0.3)),
            (Metric::VacancyRate, FreshnessWindow::new(120, 0.35)),
            (Metric::PropertyTaxRate, FreshnessWindow::new(300, 0.5)),
            (Metric::DaysOnMarket, FreshnessWindow::new(45, 0.25)),
            (Metric::RentGrowthYoy, FreshnessWindow::new(120, 0.3)),
            (Metric::PriceGrowthYoy, FreshnessWindow::new(120, 0.3)),
            (Metric::CapRate, FreshnessWindow::new(180, 0.35)),
        ]
        .into_iter()
        .collect();

        Self {
            undated_weight: 0.6,
            stale_horizon_days: 365,
            default_policy: FreshnessWindow::new(90, 0.3),
            policies,
        }
    }
}

impl RecencyConfig {
    /// Checks every policy against the stale horizon.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidFreshnessPolicy` when a window is
    /// not shorter than the horizon or a floor lies outside [0, 1], and
    /// `ConfigurationError::InvalidSetting` for a bad undated weight or horizon.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.stale_horizon_days == 0 {
            return Err(ConfigurationError::setting(
                "recency.stale_horizon_days",
                "must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.undated_weight) {
            return Err(ConfigurationError::setting(
                "recency.undated_weight",
                format!("{} is outside [0, 1]", self.undated_weight),
            ));
        }
        let named = self
            .policies
            .iter()
            .map(|(m, w)| (m.key().to_string(), w))
            .chain(std::iter::once(("default".to_string(), &self.default_policy)));
        for (metric, window) in named {
            if window.max_fresh_days >= self.stale_horizon_days {
                return Err(ConfigurationError::InvalidFreshnessPolicy {
                    metric,
                    reason: format!(
                        "max_fresh_days {} must be below the stale horizon {}",
                        window.max_fresh_days, self.stale_horizon_days
                    ),
                });
            }
            if !(0.0..=1.0).contains(&window.stale_weight_floor) {
                return Err(ConfigurationError::InvalidFreshnessPolicy {
                    metric,
                    reason: format!(
                        "stale_weight_floor {} is outside [0, 1]",
                        window.stale_weight_floor
                    ),
                });
            }
        }
        Ok(())
    }

    /// The policy for `metric`, falling back to the default policy.
    #[must_use]
    pub fn policy_for(&self, metric: &Metric) -> MetricFreshnessPolicy {
        let window = self
            .policies
            .get(metric)
            .copied()
            .unwrap_or(self.default_policy);
        MetricFreshnessPolicy {
            metric: metric.clone(),
            max_fresh_days: window.max_fresh_days,
            stale_weight_floor: window.stale_weight_floor,
        }
    }

    /// Recency multiplier for data about `metric` dated `as_of`, seen on `today`.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use market_consensus::{Metric, RecencyConfig};
    ///
    /// let config = RecencyConfig::default();
    /// let today = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
    /// let fresh = NaiveDate::from_ymd_opt(2024, 11, 1).unwrap();
    /// let stale = NaiveDate::from_ymd_opt(2023, 10, 1).unwrap();
    ///
    /// assert_eq!(config.weight(Some(fresh), &Metric::MedianRent, today), 1.0);
    /// assert_eq!(config.weight(Some(stale), &Metric::MedianRent, today), 0.3);
    /// assert_eq!(config.weight(None, &Metric::MedianRent, today), 0.6);
    /// ```
    #[must_use]
    pub fn weight(&self, as_of: Option<NaiveDate>, metric: &Metric, today: NaiveDate) -> f64 {
        let Some(as_of) = as_of else {
            return self.undated_weight;
        };
        let window = self
            .policies
            .get(metric)
            .copied()
            .unwrap_or(self.default_policy);
        decay(
            (today - as_of).num_days(),
            window,
            i64::from(self.stale_horizon_days),
        )
    }
}

/// Linear decay between the freshness window and the stale horizon.
///
/// Negative ages (dates in the future) count as fresh.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn decay(age_days: i64, window: FreshnessWindow, horizon_days: i64) -> f64 {
    let fresh = i64::from(window.max_fresh_days);
    let floor = window.stale_weight_floor;
    if age_days <= fresh {
        return 1.0;
    }
    if age_days >= horizon_days || horizon_days <= fresh {
        return floor;
    }
    let progress = (age_days - fresh) as f64 / (horizon_days - fresh) as f64;
    (1.0 - (1.0 - floor) * progress).clamp(floor, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn boundaries() {
        let w = FreshnessWindow::new(65, 0.4);
        assert!((decay(0, w, 365) - 1.0).abs() < f64::EPSILON);
        assert!((decay(65, w, 365) - 1.0).abs() < f64::EPSILON);
        assert!((decay(365, w, 365) - 0.4).abs() < f64::EPSILON);
        assert!((decay(900, w, 365) - 0.4).abs() < f64::EPSILON);
        assert!((decay(-30, w, 365) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn interpolates_linearly() {
        // Halfway between 65 and 365 days.
        let w = FreshnessWindow::new(65, 0.4);
        assert!((decay(215, w, 365) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn decay_is_monotonic() {
        let w = FreshnessWindow::new(90, 0.3);
        let mut prev = 1.0;
        for age in 0..400 {
            let next = decay(age, w, 365);
            assert!(next <= prev + 1e-12);
            prev = next;
        }
    }

    #[test]
    fn per_metric_policy_applies() {
        let config = RecencyConfig::default();
        let today = day(2024, 12, 1);
        let as_of = day(2024, 9, 1); // 91 days
        let rent = config.weight(Some(as_of), &Metric::MedianRent, today);
        let tax = config.weight(Some(as_of), &Metric::PropertyTaxRate, today);
        assert!(rent < 1.0);
        assert!((tax - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_metric_uses_default_policy() {
        let config = RecencyConfig::default();
        let policy = config.policy_for(&Metric::Other("hoa_fee".into()));
        assert_eq!(policy.max_fresh_days, 90);
        assert!((policy.stale_weight_floor - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn validation_rejects_window_past_horizon() {
        let mut config = RecencyConfig::default();
        config
            .policies
            .insert(Metric::MedianRent, FreshnessWindow::new(365, 0.3));
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidFreshnessPolicy { .. })
        ));

        let mut config = RecencyConfig::default();
        config.default_policy.stale_weight_floor = 1.5;
        assert!(config.validate().is_err());

        assert!(RecencyConfig::default().validate().is_ok());
    }

    #[test]
    fn config_roundtrips_through_json() {
        let json = r#"{ "undated_weight": 0.5, "policies": { "median_rent": { "max_fresh_days": 30, "stale_weight_floor": 0.2 } } }"#;
        let config: RecencyConfig = serde_json::from_str(json).unwrap();
        assert!((config.undated_weight - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.stale_horizon_days, 365);
        assert_eq!(config.policy_for(&Metric::MedianRent).max_fresh_days, 30);
    }
}
