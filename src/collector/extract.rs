//! Numeric value extraction from search responses.
//!
//! Structured extraction output is preferred; otherwise values are pulled
//! from text with category-specific patterns. Values outside a plausible
//! band for their category are discarded.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::metric::{Metric, MetricCategory};
use crate::value::ExtractedValue;

/// Turns response text into a value for a metric.
pub trait ValueExtractor: Send + Sync {
    /// Extracts from structured output produced by an extraction oracle.
    fn extract_structured(&self, metric: &Metric, raw: &serde_json::Value) -> Option<ExtractedValue> {
        ExtractedValue::from_json(raw).filter(|v| plausible(metric.category(), v))
    }

    /// Extracts from free text.
    fn extract_text(&self, metric: &Metric, text: &str) -> Option<ExtractedValue>;
}

/// Pattern-based extractor.
///
/// # Examples
///
/// ```
/// use market_consensus::collector::{RegexValueExtractor, ValueExtractor};
/// use market_consensus::{ExtractedValue, Metric};
///
/// let x = RegexValueExtractor;
/// assert_eq!(
///     x.extract_text(&Metric::MedianHomePrice, "Median sale price hit $1.2M"),
///     Some(ExtractedValue::numeric(1_200_000.0).unwrap())
/// );
/// assert_eq!(
///     x.extract_text(&Metric::RentGrowthYoy, "Rents fell 2.5% year over year"),
///     Some(ExtractedValue::numeric(-2.5).unwrap())
/// );
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexValueExtractor;

const AMOUNT: &str = r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)";
const SUFFIX: &str = r"(?:\s*(k|m|mm|thousand|million)\b)?";
const DASH: &str = r"\s*(?:-|–|—|to)\s*";

static CURRENCY_RANGE: OnceLock<Regex> = OnceLock::new();
static CURRENCY: OnceLock<Regex> = OnceLock::new();
static PERCENT_RANGE: OnceLock<Regex> = OnceLock::new();
static PERCENT_DECLINE: OnceLock<Regex> = OnceLock::new();
static PERCENT: OnceLock<Regex> = OnceLock::new();
static DURATION_RANGE: OnceLock<Regex> = OnceLock::new();
static DURATION: OnceLock<Regex> = OnceLock::new();
static BARE_NUMBER: OnceLock<Regex> = OnceLock::new();

fn compiled(cell: &'static OnceLock<Regex>, pattern: impl FnOnce() -> String) -> &'static Regex {
    cell.get_or_init(|| Regex::new(&pattern()).expect("valid extraction regex"))
}

impl ValueExtractor for RegexValueExtractor {
    fn extract_text(&self, metric: &Metric, text: &str) -> Option<ExtractedValue> {
        let category = metric.category();
        let found = match category {
            MetricCategory::Price | MetricCategory::Rent => currency(text),
            MetricCategory::Vacancy | MetricCategory::Rate | MetricCategory::Growth => {
                percent(text, category.allows_negative())
            }
            MetricCategory::TimeOnMarket => duration(text),
            MetricCategory::Other => currency(text)
                .or_else(|| percent(text, true))
                .or_else(|| bare_number(text)),
        };
        found.filter(|v| plausible(category, v))
    }
}

/// Whether a value is believable for its category.
#[must_use]
pub fn plausible(category: MetricCategory, value: &ExtractedValue) -> bool {
    let (low, high) = match category {
        MetricCategory::Price => (10_000.0, 100_000_000.0),
        MetricCategory::Rent => (100.0, 100_000.0),
        MetricCategory::Vacancy | MetricCategory::Rate => (0.0, 100.0),
        MetricCategory::TimeOnMarket => (0.0, 3_650.0),
        MetricCategory::Growth => (-100.0, 1_000.0),
        MetricCategory::Other => (f64::MIN, f64::MAX),
    };
    value.low() >= low && value.high() <= high
}

fn currency(text: &str) -> Option<ExtractedValue> {
    let range = compiled(&CURRENCY_RANGE, || {
        format!(r"(?i)\${AMOUNT}{SUFFIX}{DASH}\$?{AMOUNT}{SUFFIX}")
    });
    if let Some(c) = range.captures(text) {
        let high_suffix = c.get(4).map(|m| m.as_str());
        // "$300-350k" applies the trailing suffix to both ends.
        let low_suffix = c.get(2).map(|m| m.as_str()).or(high_suffix);
        let low = amount(c.get(1)?.as_str(), low_suffix)?;
        let high = amount(c.get(3)?.as_str(), high_suffix)?;
        return ExtractedValue::range(low, high).ok();
    }

    let single = compiled(&CURRENCY, || format!(r"(?i)\$\s*{AMOUNT}{SUFFIX}"));
    single
        .captures_iter(text)
        .find_map(|c| amount(c.get(1)?.as_str(), c.get(2).map(|m| m.as_str())))
        .and_then(|v| ExtractedValue::numeric(v).ok())
}

fn percent(text: &str, allow_negative: bool) -> Option<ExtractedValue> {
    let range = compiled(&PERCENT_RANGE, || {
        r"(?i)(-?\d+(?:\.\d+)?)\s*%?\s*(?:-|–|—|to)\s*(-?\d+(?:\.\d+)?)\s*(?:%|percent)".to_string()
    });
    if let Some(c) = range.captures(text) {
        let low = number(c.get(1)?.as_str())?;
        let high = number(c.get(2)?.as_str())?;
        if let Ok(v) = ExtractedValue::range(low, high) {
            return Some(v);
        }
    }

    if allow_negative {
        let decline = compiled(&PERCENT_DECLINE, || {
            r"(?i)\b(?:down|fell|fall|declined?|decreased?|dropped|drop)\s+(?:by\s+)?(\d+(?:\.\d+)?)\s*(?:%|percent)"
                .to_string()
        });
        if let Some(c) = decline.captures(text) {
            return ExtractedValue::numeric(-number(c.get(1)?.as_str())?).ok();
        }
    }

    let single = compiled(&PERCENT, || r"(?i)(-?\d+(?:\.\d+)?)\s*(?:%|percent)".to_string());
    single
        .captures_iter(text)
        .find_map(|c| number(c.get(1)?.as_str()))
        .filter(|v| allow_negative || *v >= 0.0)
        .and_then(|v| ExtractedValue::numeric(v).ok())
}

fn duration(text: &str) -> Option<ExtractedValue> {
    let range = compiled(&DURATION_RANGE, || {
        format!(r"(?i)(\d+(?:\.\d+)?){DASH}(\d+(?:\.\d+)?)\s*(days?|weeks?)\b")
    });
    if let Some(c) = range.captures(text) {
        let factor = unit_days(&c, 3);
        let low = number(c.get(1)?.as_str())? * factor;
        let high = number(c.get(2)?.as_str())? * factor;
        return ExtractedValue::range(low, high).ok();
    }

    let single = compiled(&DURATION, || r"(?i)(\d+(?:\.\d+)?)\s*(days?|weeks?)\b".to_string());
    let c = single.captures(text)?;
    let days = number(c.get(1)?.as_str())? * unit_days(&c, 2);
    ExtractedValue::numeric(days).ok()
}

fn bare_number(text: &str) -> Option<ExtractedValue> {
    let re = compiled(&BARE_NUMBER, || format!(r"(?i){AMOUNT}"));
    re.captures(text)
        .and_then(|c| number(c.get(1)?.as_str()))
        .and_then(|v| ExtractedValue::numeric(v).ok())
}

fn unit_days(c: &Captures<'_>, idx: usize) -> f64 {
    match c.get(idx).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(unit) if unit.starts_with("week") => 7.0,
        _ => 1.0,
    }
}

fn amount(digits: &str, suffix: Option<&str>) -> Option<f64> {
    let base = number(digits)?;
    let factor = match suffix.map(str::to_ascii_lowercase).as_deref() {
        Some("k" | "thousand") => 1_000.0,
        Some("m" | "mm" | "million") => 1_000_000.0,
        _ => 1.0,
    };
    Some(base * factor)
}

fn number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}
