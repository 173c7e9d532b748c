//! As-of date recognition in free text.
//!
//! Month-granular dates resolve to the 15th; quarters resolve to the 15th of
//! their middle month. An explicit "as of ..." phrase wins over any other date
//! in the same text. Unparseable text yields `None`.

use std::sync::OnceLock;

use chrono::{Duration, NaiveDate};
use regex::{Captures, Regex};

const MONTHS: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

static AS_OF: OnceLock<Regex> = OnceLock::new();
static ISO: OnceLock<Regex> = OnceLock::new();
static US_FULL: OnceLock<Regex> = OnceLock::new();
static MONTH_DAY_YEAR: OnceLock<Regex> = OnceLock::new();
static QUARTER: OnceLock<Regex> = OnceLock::new();
static YEAR_QUARTER: OnceLock<Regex> = OnceLock::new();
static MONTH_YEAR: OnceLock<Regex> = OnceLock::new();
static NUMERIC_MONTH_YEAR: OnceLock<Regex> = OnceLock::new();
static RELATIVE: OnceLock<Regex> = OnceLock::new();

fn compiled(cell: &'static OnceLock<Regex>, pattern: impl FnOnce() -> String) -> &'static Regex {
    cell.get_or_init(|| Regex::new(&pattern()).expect("valid date regex"))
}

/// Finds the as-of date a snippet refers to.
///
/// `today` anchors relative phrases such as "3 weeks ago".
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use market_consensus::recency::parse_as_of;
///
/// let today = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
/// assert_eq!(
///     parse_as_of("Median rent is $1,650 as of October 2024", today),
///     NaiveDate::from_ymd_opt(2024, 10, 15)
/// );
/// assert_eq!(
///     parse_as_of("Q3 2024 report", today),
///     NaiveDate::from_ymd_opt(2024, 8, 15)
/// );
/// assert_eq!(parse_as_of("no date here", today), None);
/// ```
#[must_use]
pub fn parse_as_of(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let as_of = compiled(&AS_OF, || r"(?i)\b(?:as\s+of|updated|through)\s+(.{4,40})".to_string());
    if let Some(tail) = as_of.captures(text).and_then(|c| c.get(1)) {
        if let Some(date) = parse_date(tail.as_str(), today) {
            return Some(date);
        }
    }
    parse_date(text, today)
}

/// Parses the most specific date found anywhere in `text`.
#[must_use]
pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let iso = compiled(&ISO, || r"\b(\d{4})-(\d{1,2})-(\d{1,2})".to_string());
    if let Some(d) = iso.captures_iter(text).find_map(|c| ymd(&c, 1, 2, 3)) {
        return Some(d);
    }

    let us = compiled(&US_FULL, || r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b".to_string());
    if let Some(d) = us.captures_iter(text).find_map(|c| ymd(&c, 3, 1, 2)) {
        return Some(d);
    }

    let mdy = compiled(&MONTH_DAY_YEAR, || {
        format!(r"(?i)\b{MONTHS}\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b")
    });
    if let Some(d) = mdy.captures_iter(text).find_map(|c| {
        let month = month_number(c.get(1)?.as_str())?;
        let day = c.get(2)?.as_str().parse().ok()?;
        let year = year(c.get(3)?.as_str())?;
        NaiveDate::from_ymd_opt(year, month, day)
    }) {
        return Some(d);
    }

    let quarter = compiled(&QUARTER, || r"(?i)\bQ([1-4])\s*[-'/]?\s*(\d{4})\b".to_string());
    if let Some(d) = quarter
        .captures_iter(text)
        .find_map(|c| mid_quarter(c.get(1)?.as_str(), c.get(2)?.as_str()))
    {
        return Some(d);
    }
    let year_quarter = compiled(&YEAR_QUARTER, || r"(?i)\b(\d{4})\s*[-/]?\s*Q([1-4])\b".to_string());
    if let Some(d) = year_quarter
        .captures_iter(text)
        .find_map(|c| mid_quarter(c.get(2)?.as_str(), c.get(1)?.as_str()))
    {
        return Some(d);
    }

    let month_year = compiled(&MONTH_YEAR, || format!(r"(?i)\b{MONTHS}\.?,?\s+(\d{{4}})\b"));
    if let Some(d) = month_year.captures_iter(text).find_map(|c| {
        let month = month_number(c.get(1)?.as_str())?;
        NaiveDate::from_ymd_opt(year(c.get(2)?.as_str())?, month, 15)
    }) {
        return Some(d);
    }

    let numeric = compiled(&NUMERIC_MONTH_YEAR, || r"\b(0?[1-9]|1[0-2])/(\d{4})\b".to_string());
    if let Some(d) = numeric.captures_iter(text).find_map(|c| {
        let month = c.get(1)?.as_str().parse().ok()?;
        NaiveDate::from_ymd_opt(year(c.get(2)?.as_str())?, month, 15)
    }) {
        return Some(d);
    }

    let relative = compiled(&RELATIVE, || {
        r"(?i)\b(\d{1,3})\s+(day|week|month|year)s?\s+ago\b".to_string()
    });
    relative.captures(text).and_then(|c| {
        let n: i64 = c.get(1)?.as_str().parse().ok()?;
        let days = match c.get(2)?.as_str().to_ascii_lowercase().as_str() {
            "day" => n,
            "week" => n * 7,
            "month" => n * 30,
            _ => n * 365,
        };
        today.checked_sub_signed(Duration::days(days))
    })
}

fn ymd(c: &Captures<'_>, y: usize, m: usize, d: usize) -> Option<NaiveDate> {
    let year = year(c.get(y)?.as_str())?;
    let month = c.get(m)?.as_str().parse().ok()?;
    let day = c.get(d)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn mid_quarter(q: &str, y: &str) -> Option<NaiveDate> {
    let q: u32 = q.parse().ok()?;
    NaiveDate::from_ymd_opt(year(y)?, (q - 1) * 3 + 2, 15)
}

fn year(raw: &str) -> Option<i32> {
    raw.parse::<i32>()
        .ok()
        .filter(|y| (1900..=2100).contains(y))
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, day)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()
    }

    #[test]
    fn as_of_month_year() {
        assert_eq!(parse_as_of("Rents rose 3% since March 2023, as of June 2024.", today()), d(2024, 6, 15));
    }

    #[test]
    fn quarter_is_mid_quarter() {
        assert_eq!(parse_as_of("Q1 2024 vacancy survey", today()), d(2024, 2, 15));
        assert_eq!(parse_as_of("2023 Q4 market report", today()), d(2023, 11, 15));
        assert_eq!(parse_as_of("q3-2024", today()), d(2024, 8, 15));
    }

    #[test]
    fn iso_and_timestamps() {
        assert_eq!(parse_as_of("2024-09-30", today()), d(2024, 9, 30));
        assert_eq!(parse_as_of("published 2024-10-02T08:00:00Z", today()), d(2024, 10, 2));
    }

    #[test]
    fn month_day_year_and_abbreviations() {
        assert_eq!(parse_as_of("Sept. 5, 2024", today()), d(2024, 9, 5));
        assert_eq!(parse_as_of("Data for Aug 2024", today()), d(2024, 8, 15));
    }

    #[test]
    fn numeric_month_year() {
        assert_eq!(parse_as_of("report 07/2024", today()), d(2024, 7, 15));
        assert_eq!(parse_as_of("11/03/2024", today()), d(2024, 11, 3));
    }

    #[test]
    fn relative_phrases() {
        assert_eq!(parse_as_of("updated 2 weeks ago", today()), d(2024, 11, 17));
    }

    #[test]
    fn unparseable_is_none() {
        assert_eq!(parse_as_of("median rent is about $1,650", today()), None);
        assert_eq!(parse_as_of("13/2024", today()), None);
        assert_eq!(parse_as_of("May 3000", today()), None);
    }
}
