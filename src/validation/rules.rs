//! Cross-metric sanity rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Severity;
use crate::error::ConfigurationError;
use crate::metric::Metric;

/// A configurable cross-metric check.
///
/// Each rule compares values already collected for one entity and yields
/// at most one violation. Rules whose inputs are missing are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CrossMetricRule {
    /// Monthly rent / home price must fall within `[min_ratio, max_ratio]`.
    ///
    /// Violations beyond `critical_factor` times a bound are critical.
    RentPriceRatio {
        /// Lower bound on monthly rent / price.
        min_ratio: f64,
        /// Upper bound on monthly rent / price.
        max_ratio: f64,
        /// Multiplier past which a violation is critical.
        critical_factor: f64,
    },

    /// Very low vacancy with falling rents is suspicious.
    VacancyRentGrowth {
        /// Vacancy (percent) below which the market counts as tight.
        max_vacancy_pct: f64,
        /// Rent growth (percent) below which rents count as falling.
        min_rent_growth_pct: f64,
        /// Severity of a violation.
        severity: Severity,
    },

    /// Property tax rate must be plausible when a price is known.
    TaxRateVsPrice {
        /// Lowest plausible annual rate (percent).
        min_rate_pct: f64,
        /// Highest plausible annual rate (percent).
        max_rate_pct: f64,
        /// Multiplier past which a violation is critical.
        critical_factor: f64,
    },

    /// A reported cap rate should roughly match the one implied by rent and price.
    CapRateVsCashFlow {
        /// Share of gross rent consumed by operating expenses.
        expense_ratio: f64,
        /// Allowed gap between reported and implied cap rate (percentage points).
        tolerance_pct: f64,
    },
}

/// One rule violation.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleViolation {
    /// Metrics the violation implicates.
    pub metrics: Vec<Metric>,
    /// How serious it is.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

impl CrossMetricRule {
    /// The rules applied when none are configured.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::RentPriceRatio {
                min_ratio: 0.0035,
                max_ratio: 0.015,
                critical_factor: 2.0,
            },
            Self::VacancyRentGrowth {
                max_vacancy_pct: 3.0,
                min_rent_growth_pct: -2.0,
                severity: Severity::Medium,
            },
            Self::TaxRateVsPrice {
                min_rate_pct: 0.2,
                max_rate_pct: 4.0,
                critical_factor: 2.0,
            },
            Self::CapRateVsCashFlow {
                expense_ratio: 0.4,
                tolerance_pct: 3.0,
            },
        ]
    }

    /// Stable rule name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RentPriceRatio { .. } => "rent_price_ratio",
            Self::VacancyRentGrowth { .. } => "vacancy_rent_growth",
            Self::TaxRateVsPrice { .. } => "tax_rate_vs_price",
            Self::CapRateVsCashFlow { .. } => "cap_rate_vs_cash_flow",
        }
    }

    /// Checks the rule's parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidRule` for inverted or non-positive bounds.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidRule {
            rule: self.name().to_string(),
            reason,
        };
        match *self {
            Self::RentPriceRatio {
                min_ratio,
                max_ratio,
                critical_factor,
            } => {
                if !(min_ratio > 0.0 && min_ratio < max_ratio) {
                    return Err(invalid(format!(
                        "min_ratio {min_ratio} must be positive and below max_ratio {max_ratio}"
                    )));
                }
                check_factor(critical_factor).map_err(invalid)
            }
            Self::VacancyRentGrowth { max_vacancy_pct, .. } => {
                if !(0.0..=100.0).contains(&max_vacancy_pct) {
                    return Err(invalid(format!("max_vacancy_pct {max_vacancy_pct} is outside [0, 100]")));
                }
                Ok(())
            }
            Self::TaxRateVsPrice {
                min_rate_pct,
                max_rate_pct,
                critical_factor,
            } => {
                if !(min_rate_pct >= 0.0 && min_rate_pct < max_rate_pct) {
                    return Err(invalid(format!(
                        "min_rate_pct {min_rate_pct} must be non-negative and below max_rate_pct {max_rate_pct}"
                    )));
                }
                check_factor(critical_factor).map_err(invalid)
            }
            Self::CapRateVsCashFlow {
                expense_ratio,
                tolerance_pct,
            } => {
                if !(0.0..1.0).contains(&expense_ratio) {
                    return Err(invalid(format!("expense_ratio {expense_ratio} is outside [0, 1)")));
                }
                if tolerance_pct <= 0.0 {
                    return Err(invalid(format!("tolerance_pct {tolerance_pct} must be positive")));
                }
                Ok(())
            }
        }
    }

    /// Evaluates the rule against one entity's values.
    #[must_use]
    pub fn evaluate(&self, values: &BTreeMap<Metric, f64>) -> Option<RuleViolation> {
        match *self {
            Self::RentPriceRatio {
                min_ratio,
                max_ratio,
                critical_factor,
            } => {
                let rent = *values.get(&Metric::MedianRent)?;
                let price = *values.get(&Metric::MedianHomePrice)?;
                if price <= 0.0 {
                    return None;
                }
                let ratio = rent / price;
                let (severity, bound) = if ratio < min_ratio {
                    (graded(ratio < min_ratio / critical_factor, Severity::High), min_ratio)
                } else if ratio > max_ratio {
                    (graded(ratio > max_ratio * critical_factor, Severity::High), max_ratio)
                } else {
                    return None;
                };
                let side = if ratio < bound { "below minimum" } else { "above maximum" };
                Some(RuleViolation {
                    metrics: vec![Metric::MedianRent, Metric::MedianHomePrice],
                    severity,
                    message: format!("rent/price ratio {ratio:.4} {side} {bound:.4}"),
                })
            }
            Self::VacancyRentGrowth {
                max_vacancy_pct,
                min_rent_growth_pct,
                severity,
            } => {
                let vacancy = *values.get(&Metric::VacancyRate)?;
                let growth = *values.get(&Metric::RentGrowthYoy)?;
                (vacancy < max_vacancy_pct && growth < min_rent_growth_pct).then(|| RuleViolation {
                    metrics: vec![Metric::VacancyRate, Metric::RentGrowthYoy],
                    severity,
                    message: format!(
                        "vacancy {vacancy:.1}% with rent growth {growth:.1}% is inconsistent"
                    ),
                })
            }
            Self::TaxRateVsPrice {
                min_rate_pct,
                max_rate_pct,
                critical_factor,
            } => {
                let rate = *values.get(&Metric::PropertyTaxRate)?;
                values.get(&Metric::MedianHomePrice)?;
                if (min_rate_pct..=max_rate_pct).contains(&rate) {
                    return None;
                }
                let critical = rate > max_rate_pct * critical_factor || rate < min_rate_pct / critical_factor;
                Some(RuleViolation {
                    metrics: vec![Metric::PropertyTaxRate],
                    severity: graded(critical, Severity::Medium),
                    message: format!(
                        "property tax rate {rate:.2}% outside [{min_rate_pct:.2}%, {max_rate_pct:.2}%]"
                    ),
                })
            }
            Self::CapRateVsCashFlow {
                expense_ratio,
                tolerance_pct,
            } => {
                let cap = *values.get(&Metric::CapRate)?;
                let rent = *values.get(&Metric::MedianRent)?;
                let price = *values.get(&Metric::MedianHomePrice)?;
                if price <= 0.0 {
                    return None;
                }
                let implied = rent * 12.0 * (1.0 - expense_ratio) / price * 100.0;
                let gap = (cap - implied).abs();
                if gap <= tolerance_pct {
                    return None;
                }
                let severity = if gap > 2.0 * tolerance_pct {
                    Severity::Medium
                } else {
                    Severity::Low
                };
                Some(RuleViolation {
                    metrics: vec![Metric::CapRate],
                    severity,
                    message: format!(
                        "reported cap rate {cap:.2}% differs from implied {implied:.2}% by {gap:.2} points"
                    ),
                })
            }
        }
    }
}

fn graded(critical: bool, otherwise: Severity) -> Severity {
    if critical {
        Severity::Critical
    } else {
        otherwise
    }
}

fn check_factor(factor: f64) -> Result<(), String> {
    if factor < 1.0 {
        return Err(format!("critical_factor {factor} must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(Metric, f64)]) -> BTreeMap<Metric, f64> {
        pairs.iter().cloned().collect()
    }

    fn ratio_rule() -> CrossMetricRule {
        CrossMetricRule::RentPriceRatio {
            min_ratio: 0.0035,
            max_ratio: 0.015,
            critical_factor: 2.0,
        }
    }

    #[test]
    fn ratio_within_bounds_passes() {
        let v = values(&[(Metric::MedianRent, 1650.0), (Metric::MedianHomePrice, 250_000.0)]);
        assert!(ratio_rule().evaluate(&v).is_none());
    }

    #[test]
    fn ratio_far_below_minimum_is_critical() {
        let v = values(&[(Metric::MedianRent, 250.0), (Metric::MedianHomePrice, 250_000.0)]);
        let violation = ratio_rule().evaluate(&v).unwrap();
        assert_eq!(violation.severity, Severity::Critical);
        assert!(violation.message.contains("below minimum"));
        assert_eq!(violation.metrics.len(), 2);
    }

    #[test]
    fn ratio_slightly_above_maximum_is_high() {
        let v = values(&[(Metric::MedianRent, 2000.0), (Metric::MedianHomePrice, 100_000.0)]);
        assert_eq!(ratio_rule().evaluate(&v).unwrap().severity, Severity::High);
    }

    #[test]
    fn missing_inputs_skip_rule() {
        let v = values(&[(Metric::MedianRent, 250.0)]);
        assert!(ratio_rule().evaluate(&v).is_none());
    }

    #[test]
    fn tight_market_with_falling_rents_flagged() {
        let rule = CrossMetricRule::defaults()[1].clone();
        let v = values(&[(Metric::VacancyRate, 2.0), (Metric::RentGrowthYoy, -4.0)]);
        assert_eq!(rule.evaluate(&v).unwrap().severity, Severity::Medium);
        let v = values(&[(Metric::VacancyRate, 6.0), (Metric::RentGrowthYoy, -4.0)]);
        assert!(rule.evaluate(&v).is_none());
    }

    #[test]
    fn tax_rate_needs_price_context() {
        let rule = CrossMetricRule::defaults()[2].clone();
        assert!(rule.evaluate(&values(&[(Metric::PropertyTaxRate, 12.0)])).is_none());
        let v = values(&[(Metric::PropertyTaxRate, 12.0), (Metric::MedianHomePrice, 200_000.0)]);
        assert_eq!(rule.evaluate(&v).unwrap().severity, Severity::Critical);
        let v = values(&[(Metric::PropertyTaxRate, 5.0), (Metric::MedianHomePrice, 200_000.0)]);
        assert_eq!(rule.evaluate(&v).unwrap().severity, Severity::Medium);
    }

    #[test]
    fn cap_rate_compared_with_implied() {
        let rule = CrossMetricRule::defaults()[3].clone();
        // 1500 * 12 * 0.6 / 200_000 = 5.4%
        let base = [(Metric::MedianRent, 1500.0), (Metric::MedianHomePrice, 200_000.0)];
        let mut v = values(&base);
        v.insert(Metric::CapRate, 6.0);
        assert!(rule.evaluate(&v).is_none());
        v.insert(Metric::CapRate, 12.0);
        assert_eq!(rule.evaluate(&v).unwrap().severity, Severity::Medium);
        v.insert(Metric::CapRate, 9.0);
        assert_eq!(rule.evaluate(&v).unwrap().severity, Severity::Low);
    }

    #[test]
    fn invalid_parameters_rejected() {
        let rule = CrossMetricRule::RentPriceRatio {
            min_ratio: 0.02,
            max_ratio: 0.01,
            critical_factor: 2.0,
        };
        assert!(matches!(rule.validate(), Err(ConfigurationError::InvalidRule { .. })));
        for rule in CrossMetricRule::defaults() {
            assert!(rule.validate().is_ok());
        }
    }

    #[test]
    fn rules_deserialize_tagged() {
        let json = r#"{"rule": "vacancy_rent_growth", "max_vacancy_pct": 4.0, "min_rent_growth_pct": -1.0, "severity": "HIGH"}"#;
        let rule: CrossMetricRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.name(), "vacancy_rent_growth");
    }
}
