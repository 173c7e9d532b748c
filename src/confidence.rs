//! Confidence classification for consensus values.
//!
//! A consensus carries both a coarse level (what consumers branch on) and a
//! numeric score that explains how the level was reached. The level is
//! ordered: `None < Low < Medium < High`, so caps are simple `min`s.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Coarse confidence classification.
///
/// Consumers must treat `None` as absent data, never as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    /// No usable data at any fallback depth.
    None,
    /// Data exists but is stale, mismatched, or weakly supported.
    Low,
    /// At least one independent source with a freshness or corroboration shortfall.
    Medium,
    /// Corroborated by several fresh independent sources with passing cross-checks.
    High,
}

impl ConfidenceLevel {
    /// Returns the lower of `self` and `cap`.
    #[must_use]
    pub fn capped_at(self, cap: Self) -> Self {
        self.min(cap)
    }

    /// Numeric base score assigned to a rule-derived level.
    #[must_use]
    pub const fn base_score(self) -> f64 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.65,
            Self::Low => 0.35,
            Self::None => 0.0,
        }
    }

    /// True if the value is usable data.
    #[must_use]
    pub const fn has_data(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl Default for ConfidenceLevel {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
            Self::None => write!(f, "NONE"),
        }
    }
}

/// Numeric confidence in [0.0, 1.0].
///
/// # Examples
///
/// ```
/// use market_consensus::{ConfidenceLevel, ConfidenceScore};
///
/// let score = ConfidenceScore::new(0.72).unwrap();
/// assert_eq!(score.level(), ConfidenceLevel::Medium);
/// assert!(ConfidenceScore::new(1.2).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfidenceScore(f64);

impl ConfidenceScore {
    /// Minimum valid score.
    pub const MIN_VALUE: f64 = 0.0;

    /// Maximum valid score.
    pub const MAX_VALUE: f64 = 1.0;

    /// Floor applied to scores backed by real data so they never read as "no data".
    pub const DATA_FLOOR: f64 = 0.01;

    /// Creates a score with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::WeightOutOfRange` if the value is NaN or outside [0.0, 1.0].
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if value.is_nan() || !(Self::MIN_VALUE..=Self::MAX_VALUE).contains(&value) {
            return Err(ValidationError::WeightOutOfRange { value });
        }
        Ok(Self(value))
    }

    /// Creates a score, clamping into range. NaN becomes zero.
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(Self::MIN_VALUE, Self::MAX_VALUE))
    }

    /// Zero confidence.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0.0)
    }

    /// Raw score in [0.0, 1.0].
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.0
    }

    /// Score of 0.8 or above.
    #[must_use]
    pub fn is_high(&self) -> bool {
        self.0 >= 0.8
    }

    /// Score in [0.5, 0.8).
    #[must_use]
    pub fn is_medium(&self) -> bool {
        self.0 >= 0.5 && self.0 < 0.8
    }

    /// Score below 0.5.
    #[must_use]
    pub fn is_low(&self) -> bool {
        self.0 < 0.5
    }

    /// Level implied by the score alone. Zero maps to `None`.
    #[must_use]
    pub fn level(&self) -> ConfidenceLevel {
        if self.is_high() {
            ConfidenceLevel::High
        } else if self.is_medium() {
            ConfidenceLevel::Medium
        } else if self.0 > 0.0 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::None
        }
    }

    /// Subtracts a penalty, never dropping below `floor`.
    #[must_use]
    pub fn penalized(self, penalty: f64, floor: f64) -> Self {
        Self::clamped((self.0 - penalty).max(floor))
    }

    /// Multiplies by a factor in [0, 1], never dropping below `floor`.
    #[must_use]
    pub fn scaled(self, factor: f64, floor: f64) -> Self {
        Self::clamped((self.0 * factor).max(floor))
    }
}

impl Default for ConfidenceScore {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for ConfidenceScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(ConfidenceLevel::High > ConfidenceLevel::Medium);
        assert!(ConfidenceLevel::Medium > ConfidenceLevel::Low);
        assert!(ConfidenceLevel::Low > ConfidenceLevel::None);
    }

    #[test]
    fn test_capped_at() {
        assert_eq!(
            ConfidenceLevel::High.capped_at(ConfidenceLevel::Low),
            ConfidenceLevel::Low
        );
        assert_eq!(
            ConfidenceLevel::Low.capped_at(ConfidenceLevel::Medium),
            ConfidenceLevel::Low
        );
    }

    #[test]
    fn test_score_valid_values() {
        assert!(ConfidenceScore::new(0.0).is_ok());
        assert!(ConfidenceScore::new(1.0).is_ok());
        assert!(ConfidenceScore::new(-0.1).is_err());
        assert!(ConfidenceScore::new(f64::NAN).is_err());
    }

    #[test]
    fn test_score_levels() {
        assert_eq!(ConfidenceScore::clamped(0.9).level(), ConfidenceLevel::High);
        assert_eq!(ConfidenceScore::clamped(0.6).level(), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceScore::clamped(0.2).level(), ConfidenceLevel::Low);
        assert_eq!(ConfidenceScore::zero().level(), ConfidenceLevel::None);
    }

    #[test]
    fn test_penalized_respects_floor() {
        let s = ConfidenceScore::clamped(0.35).penalized(0.9, ConfidenceScore::DATA_FLOOR);
        assert!((s.value() - ConfidenceScore::DATA_FLOOR).abs() < f64::EPSILON);
        assert_eq!(s.level(), ConfidenceLevel::Low);
    }

    #[test]
    fn test_scaled() {
        let s = ConfidenceScore::clamped(0.9).scaled(0.5, 0.0);
        assert!((s.value() - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_level_serialization() {
        let json = serde_json::to_string(&ConfidenceLevel::Medium).unwrap();
        assert_eq!(json, "\"MEDIUM\"");
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ConfidenceLevel::None), "NONE");
        assert_eq!(format!("{}", ConfidenceScore::clamped(0.456)), "0.46");
    }
}
