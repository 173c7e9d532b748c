//! Market metrics and their categories.
//!
//! A metric's category drives topic-mismatch checks, value extraction and
//! default aggregation tolerances.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A market metric reported per geographic entity.
///
/// Serialized as its snake_case key so it can be used as a JSON map key in
/// configuration files.
///
/// # Examples
///
/// ```
/// use market_consensus::{Metric, MetricCategory};
///
/// let m: Metric = "median_rent".parse().unwrap();
/// assert_eq!(m, Metric::MedianRent);
/// assert_eq!(m.category(), MetricCategory::Rent);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Metric {
    /// Median sale price of a home (currency).
    MedianHomePrice,
    /// Median monthly rent (currency).
    MedianRent,
    /// Rental vacancy rate (percent).
    VacancyRate,
    /// Effective property tax rate (percent of value per year).
    PropertyTaxRate,
    /// Median days a listing stays on market.
    DaysOnMarket,
    /// Year-over-year rent growth (percent, may be negative).
    RentGrowthYoy,
    /// Year-over-year price growth (percent, may be negative).
    PriceGrowthYoy,
    /// Reported capitalization rate (percent).
    CapRate,
    /// Any metric not modelled above.
    Other(String),
}

impl Metric {
    /// All first-class metrics, in a stable order.
    pub const KNOWN: [Self; 8] = [
        Self::MedianHomePrice,
        Self::MedianRent,
        Self::VacancyRate,
        Self::PropertyTaxRate,
        Self::DaysOnMarket,
        Self::RentGrowthYoy,
        Self::PriceGrowthYoy,
        Self::CapRate,
    ];

    /// Stable snake_case key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::MedianHomePrice => "median_home_price",
            Self::MedianRent => "median_rent",
            Self::VacancyRate => "vacancy_rate",
            Self::PropertyTaxRate => "property_tax_rate",
            Self::DaysOnMarket => "days_on_market",
            Self::RentGrowthYoy => "rent_growth_yoy",
            Self::PriceGrowthYoy => "price_growth_yoy",
            Self::CapRate => "cap_rate",
            Self::Other(key) => key,
        }
    }

    /// Human-readable label used when rendering query text.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::MedianHomePrice => "median home price".to_string(),
            Self::MedianRent => "median rent".to_string(),
            Self::VacancyRate => "rental vacancy rate".to_string(),
            Self::PropertyTaxRate => "property tax rate".to_string(),
            Self::DaysOnMarket => "median days on market".to_string(),
            Self::RentGrowthYoy => "year-over-year rent growth".to_string(),
            Self::PriceGrowthYoy => "year-over-year home price growth".to_string(),
            Self::CapRate => "average cap rate".to_string(),
            Self::Other(key) => key.replace('_', " "),
        }
    }

    /// The category this metric belongs to.
    #[must_use]
    pub const fn category(&self) -> MetricCategory {
        match self {
            Self::MedianHomePrice => MetricCategory::Price,
            Self::MedianRent => MetricCategory::Rent,
            Self::VacancyRate => MetricCategory::Vacancy,
            Self::DaysOnMarket => MetricCategory::TimeOnMarket,
            Self::PropertyTaxRate | Self::CapRate => MetricCategory::Rate,
            Self::RentGrowthYoy | Self::PriceGrowthYoy => MetricCategory::Growth,
            Self::Other(_) => MetricCategory::Other,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl From<String> for Metric {
    fn from(key: String) -> Self {
        let normalized = key.trim().to_ascii_lowercase();
        Self::KNOWN
            .iter()
            .find(|m| m.key() == normalized)
            .cloned()
            .unwrap_or(Self::Other(normalized))
    }
}

impl From<Metric> for String {
    fn from(metric: Metric) -> Self {
        metric.key().to_string()
    }
}

impl FromStr for Metric {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

/// Coarse category of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    /// Sale prices and valuations.
    Price,
    /// Rents.
    Rent,
    /// Vacancy and occupancy percentages.
    Vacancy,
    /// Durations such as days on market.
    TimeOnMarket,
    /// Percent rates such as tax or cap rates.
    Rate,
    /// Signed year-over-year changes.
    Growth,
    /// Uncategorized.
    Other,
}

impl MetricCategory {
    /// True if values in this category are currency amounts.
    #[must_use]
    pub const fn is_currency(self) -> bool {
        matches!(self, Self::Price | Self::Rent)
    }

    /// True if values in this category are percentages.
    #[must_use]
    pub const fn is_percentage(self) -> bool {
        matches!(self, Self::Vacancy | Self::Rate | Self::Growth)
    }

    /// True if negative values are meaningful.
    #[must_use]
    pub const fn allows_negative(self) -> bool {
        matches!(self, Self::Growth | Self::Other)
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Price => write!(f, "price"),
            Self::Rent => write!(f, "rent"),
            Self::Vacancy => write!(f, "vacancy"),
            Self::TimeOnMarket => write!(f, "time_on_market"),
            Self::Rate => write!(f, "rate"),
            Self::Growth => write!(f, "growth"),
            Self::Other => write!(f, "other"),
        }
    }
}
