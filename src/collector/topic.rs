//! Topic-mismatch detection.
//!
//! A response is off-topic for a metric category when it carries vocabulary
//! that conflicts with the category and none of the vocabulary the category
//! expects. The marker table is data, so callers can swap or extend it.

use std::collections::HashMap;

use regex::Regex;

use crate::metric::MetricCategory;

/// Decides whether a response answers the requested kind of metric.
pub trait TopicPolicy: Send + Sync {
    /// Policy name, for logs.
    fn name(&self) -> &str;

    /// True when `text` looks like it answers a different kind of metric.
    fn is_mismatch(&self, category: MetricCategory, text: &str) -> bool;
}

/// Markers compiled into one word-bounded alternation.
#[derive(Debug, Clone, Default)]
struct MarkerSet {
    markers: Vec<String>,
    pattern: Option<Regex>,
}

impl MarkerSet {
    fn new(markers: &[&str]) -> Self {
        let markers: Vec<String> = markers.iter().map(|m| m.to_lowercase()).collect();
        let alternatives: Vec<String> = markers.iter().map(|m| marker_pattern(m)).collect();
        let pattern = (!alternatives.is_empty()).then(|| {
            Regex::new(&format!("(?:{})", alternatives.join("|"))).expect("valid topic marker regex")
        });
        Self { markers, pattern }
    }

    fn matches(&self, lowered: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(lowered))
    }
}

/// `rent` matches the word only; `rent*` matches words starting with it.
/// Symbols such as `%` and `$` match anywhere.
fn marker_pattern(marker: &str) -> String {
    let (body, stem) = match marker.strip_suffix('*') {
        Some(body) => (body, true),
        None => (marker, false),
    };
    let is_word = |c: Option<char>| c.is_some_and(char::is_alphanumeric);
    let mut pattern = String::new();
    if is_word(body.chars().next()) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(body));
    if !stem && is_word(body.chars().last()) {
        pattern.push_str(r"\b");
    }
    pattern
}

/// Expected and conflicting markers for one category.
///
/// Markers match on word boundaries, so `rent` does not fire inside
/// `currently`. A trailing `*` makes a marker a word prefix (`vacan*`).
#[derive(Debug, Clone, Default)]
pub struct TopicRule {
    expected: MarkerSet,
    conflicting: MarkerSet,
}

impl PartialEq for TopicRule {
    fn eq(&self, other: &Self) -> bool {
        self.expected.markers == other.expected.markers && self.conflicting.markers == other.conflicting.markers
    }
}

impl Eq for TopicRule {}

impl TopicRule {
    /// Builds a rule from marker lists.
    #[must_use]
    pub fn new(expected: &[&str], conflicting: &[&str]) -> Self {
        Self {
            expected: MarkerSet::new(expected),
            conflicting: MarkerSet::new(conflicting),
        }
    }

    /// Markers whose presence confirms the topic.
    #[must_use]
    pub fn expected(&self) -> &[String] {
        &self.expected.markers
    }

    /// Markers whose presence suggests another topic.
    #[must_use]
    pub fn conflicting(&self) -> &[String] {
        &self.conflicting.markers
    }

    fn is_mismatch(&self, lowered: &str) -> bool {
        self.conflicting.matches(lowered) && !self.expected.matches(lowered)
    }
}

/// Keyword table policy.
///
/// # Examples
///
/// ```
/// use market_consensus::collector::{KeywordTopicPolicy, TopicPolicy};
/// use market_consensus::MetricCategory;
///
/// let policy = KeywordTopicPolicy::default();
/// assert!(policy.is_mismatch(MetricCategory::Price, "Average rent is $1,400 per month"));
/// assert!(!policy.is_mismatch(MetricCategory::Price, "The rent-to-price ratio is 0.6%"));
/// assert!(policy.is_mismatch(MetricCategory::Vacancy, "Median rent is $1,650"));
/// ```
#[derive(Debug, Clone)]
pub struct KeywordTopicPolicy {
    rules: HashMap<MetricCategory, TopicRule>,
}

impl Default for KeywordTopicPolicy {
    fn default() -> Self {
        let rules = [
            (
                MetricCategory::Price,
                TopicRule::new(
                    &["price*", "value*", "sold", "sale*", "apprais*"],
                    &["rent*", "lease*"],
                ),
            ),
            (
                MetricCategory::Rent,
                TopicRule::new(
                    &["rent*", "lease*", "per month", "/mo*"],
                    &["sale price", "sold for", "home value", "listing price"],
                ),
            ),
            (
                MetricCategory::Vacancy,
                TopicRule::new(
                    &["%", "percent*", "vacan*", "occupan*"],
                    &["$", "usd", "dollar*"],
                ),
            ),
            (
                MetricCategory::TimeOnMarket,
                TopicRule::new(&["day*", "week*", "month*"], &["%", "percent*", "$"]),
            ),
        ]
        .into_iter()
        .collect();
        Self { rules }
    }
}

impl KeywordTopicPolicy {
    /// A policy with no rules; nothing is ever a mismatch.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Replaces the rule for `category`.
    #[must_use]
    pub fn with_rule(mut self, category: MetricCategory, rule: TopicRule) -> Self {
        self.rules.insert(category, rule);
        self
    }
}

impl TopicPolicy for KeywordTopicPolicy {
    fn name(&self) -> &str {
        "keyword"
    }

    fn is_mismatch(&self, category: MetricCategory, text: &str) -> bool {
        self.rules
            .get(&category)
            .is_some_and(|rule| rule.is_mismatch(&text.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_query_answered_with_rent() {
        let policy = KeywordTopicPolicy::default();
        assert!(policy.is_mismatch(MetricCategory::Price, "Springfield rentals average $1,200"));
        assert!(!policy.is_mismatch(MetricCategory::Price, "Median sale price $185,000"));
    }

    #[test]
    fn duration_metric_answered_with_percent() {
        let policy = KeywordTopicPolicy::default();
        assert!(policy.is_mismatch(MetricCategory::TimeOnMarket, "Inventory is down 12%"));
        assert!(!policy.is_mismatch(MetricCategory::TimeOnMarket, "Homes sell in 28 days, down 5%"));
    }

    #[test]
    fn vacancy_answered_with_currency() {
        let policy = KeywordTopicPolicy::default();
        assert!(policy.is_mismatch(MetricCategory::Vacancy, "Average rent $1,100"));
        assert!(!policy.is_mismatch(MetricCategory::Vacancy, "Rental vacancy 6.1%"));
    }

    #[test]
    fn markers_do_not_fire_inside_other_words() {
        let policy = KeywordTopicPolicy::default();
        assert!(!policy.is_mismatch(MetricCategory::Price, "Homes in Springfield currently list around $185,000"));
        assert!(!policy.is_mismatch(MetricCategory::Price, "Parent company data shows a different median of $190,000"));
        assert!(!policy.is_mismatch(MetricCategory::Price, "The rent-to-price ratio is 0.6%"));
        assert!(policy.is_mismatch(MetricCategory::Price, "Rents climbed to $1,450"));
        // "today" carries no duration marker.
        assert!(policy.is_mismatch(MetricCategory::TimeOnMarket, "As of today, 4% of listings are new"));
    }

    #[test]
    fn stem_markers_match_word_prefixes() {
        let rule = TopicRule::new(&["vacan*"], &["$"]);
        assert!(!rule.is_mismatch("vacancies cost landlords $400"));
        assert!(rule.is_mismatch("landlords lost $400"));
        assert_eq!(rule.expected(), ["vacan*"]);
    }

    #[test]
    fn categories_without_rules_never_mismatch() {
        let policy = KeywordTopicPolicy::default();
        assert!(!policy.is_mismatch(MetricCategory::Rate, "anything at all $"));
    }

    #[test]
    fn rules_are_swappable() {
        let policy = KeywordTopicPolicy::empty()
            .with_rule(MetricCategory::Rate, TopicRule::new(&["tax"], &["insurance"]));
        assert!(policy.is_mismatch(MetricCategory::Rate, "Insurance rates rose"));
        assert!(!policy.is_mismatch(MetricCategory::Price, "Average rent"));
    }
}
