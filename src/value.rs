//! Extracted metric values.
//!
//! The extraction oracle sometimes reports a single number and sometimes a
//! range. Both shapes are modelled explicitly so downstream checks can match
//! on the variant instead of probing an untyped blob.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A value extracted from a research finding.
///
/// # Examples
///
/// ```
/// use market_consensus::ExtractedValue;
///
/// let point = ExtractedValue::numeric(1650.0).unwrap();
/// let range = ExtractedValue::range(1500.0, 1800.0).unwrap();
///
/// assert_eq!(point.point(), 1650.0);
/// assert_eq!(range.point(), 1650.0);
/// assert!(range.is_range());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractedValue {
    /// A single number.
    Numeric {
        /// The reported value.
        value: f64,
    },
    /// An inclusive range.
    Range {
        /// Lower bound.
        low: f64,
        /// Upper bound.
        high: f64,
    },
}

impl ExtractedValue {
    /// Creates a numeric value.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::NonFiniteValue` for NaN or infinite input.
    pub fn numeric(value: f64) -> Result<Self, ValidationError> {
        ensure_finite(value)?;
        Ok(Self::Numeric { value })
    }

    /// Creates a range value. A degenerate range collapses to a number.
    ///
    /// # Errors
    ///
    /// Returns an error for non-finite bounds or when `low > high`.
    pub fn range(low: f64, high: f64) -> Result<Self, ValidationError> {
        ensure_finite(low)?;
        ensure_finite(high)?;
        if low > high {
            return Err(ValidationError::InvertedRange { low, high });
        }
        if (high - low).abs() < f64::EPSILON {
            return Ok(Self::Numeric { value: low });
        }
        Ok(Self::Range { low, high })
    }

    /// Representative point: the number itself or the range midpoint.
    #[must_use]
    pub fn point(&self) -> f64 {
        match *self {
            Self::Numeric { value } => value,
            Self::Range { low, high } => (low + high) / 2.0,
        }
    }

    /// Lowest value covered.
    #[must_use]
    pub fn low(&self) -> f64 {
        match *self {
            Self::Numeric { value } => value,
            Self::Range { low, .. } => low,
        }
    }

    /// Highest value covered.
    #[must_use]
    pub fn high(&self) -> f64 {
        match *self {
            Self::Numeric { value } => value,
            Self::Range { high, .. } => high,
        }
    }

    pub const fn is_range(&self) -> bool {
        matches!(self, Self::Range { .. })
    }

    /// Multiplies every bound by `factor`.
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        match self {
            Self::Numeric { value } => Self::Numeric {
                value: value * factor,
            },
            Self::Range { low, high } => {
                let (a, b) = (low * factor, high * factor);
                Self::Range {
                    low: a.min(b),
                    high: a.max(b),
                }
            }
        }
    }

    /// Interprets the extraction oracle's JSON payload.
    ///
    /// Accepted shapes: a bare number, a numeric string, `{"value": n}`,
    /// `{"low": a, "high": b}` and `{"min": a, "max": b}`. Anything else
    /// yields `None`.
    #[must_use]
    pub fn from_json(raw: &serde_json::Value) -> Option<Self> {
        match raw {
            serde_json::Value::Number(n) => n.as_f64().and_then(|v| Self::numeric(v).ok()),
            serde_json::Value::String(s) => {
                let cleaned: String = s
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                cleaned.parse::<f64>().ok().and_then(|v| Self::numeric(v).ok())
            }
            serde_json::Value::Object(map) => {
                let bound = |a: &str, b: &str| {
                    map.get(a)
                        .or_else(|| map.get(b))
                        .and_then(Self::from_json)
                        .map(|v| v.point())
                };
                if let (Some(low), Some(high)) = (bound("low", "min"), bound("high", "max")) {
                    return Self::range(low, high).ok();
                }
                map.get("value").and_then(Self::from_json)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for ExtractedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric { value } => write!(f, "{value}"),
            Self::Range { low, high } => write!(f, "{low}..{high}"),
        }
    }
}

fn ensure_finite(value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFiniteValue { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_rejects_nan() {
        assert!(ExtractedValue::numeric(f64::NAN).is_err());
        assert!(ExtractedValue::numeric(f64::INFINITY).is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(ExtractedValue::range(10.0, 5.0).is_err());
        let degenerate = ExtractedValue::range(7.0, 7.0).unwrap();
        assert!(!degenerate.is_range());
    }

    #[test]
    fn test_point_and_bounds() {
        let r = ExtractedValue::range(100.0, 300.0).unwrap();
        assert_eq!(r.point(), 200.0);
        assert_eq!(r.low(), 100.0);
        assert_eq!(r.high(), 300.0);
    }

    #[test]
    fn test_scaled_keeps_order() {
        let r = ExtractedValue::range(1.0, 2.0).unwrap().scaled(-1.0);
        assert_eq!(r.low(), -2.0);
        assert_eq!(r.high(), -1.0);
    }

    #[test]
    fn test_from_json_shapes() {
        assert_eq!(
            ExtractedValue::from_json(&json!(1650)),
            Some(ExtractedValue::Numeric { value: 1650.0 })
        );
        assert_eq!(
            ExtractedValue::from_json(&json!("$1,650")),
            Some(ExtractedValue::Numeric { value: 1650.0 })
        );
        assert_eq!(
            ExtractedValue::from_json(&json!({"value": 4.2})),
            Some(ExtractedValue::Numeric { value: 4.2 })
        );
        assert_eq!(
            ExtractedValue::from_json(&json!({"min": 1500, "max": 1800})),
            Some(ExtractedValue::Range { low: 1500.0, high: 1800.0 })
        );
        assert_eq!(ExtractedValue::from_json(&json!({"note": "n/a"})), None);
        assert_eq!(ExtractedValue::from_json(&json!(null)), None);
    }

    #[test]
    fn test_serialization_tagged() {
        let v = ExtractedValue::range(1.0, 2.0).unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains("\"type\":\"range\""));
        let back: ExtractedValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
