// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Week identity: mapping dates to weeks and comparing week labels.
//!
//! Week labels reach us in several textual shapes (`2025/10/06 - 2025/10/12`,
//! `2025-10-06_2025-10-12`, `2025/10/6-2025/10/12`, ...). Anything that needs to
//! decide whether two labels name the same week goes through [`identity_key`];
//! literal string equality is never used for that.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Format used for each date in a canonical week label.
pub const WEEK_LABEL_DATE_FORMAT: &str = "%Y/%m/%d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WeekKeyError {
    #[error("invalid calendar date '{0}'")]
    InvalidDate(String),
    #[error("invalid week start day {0} (expected 0 = Sunday through 6 = Saturday)")]
    InvalidWeekday(u8),
}

/// A seven-day window identified by its first day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeeklyKey {
    start: NaiveDate,
}

impl WeeklyKey {
    /// The week beginning on `start`.
    pub fn starting(start: NaiveDate) -> Self {
        Self { start }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the week, inclusive.
    pub fn end(&self) -> NaiveDate {
        self.start + Duration::days(6)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end()
    }

    /// The week immediately before this one.
    pub fn previous(&self) -> Self {
        Self::starting(self.start - Duration::days(7))
    }

    /// Canonical label, `YYYY/MM/DD - YYYY/MM/DD`.
    pub fn label(&self) -> String {
        format!(
            "{} - {}",
            self.start.format(WEEK_LABEL_DATE_FORMAT),
            self.end().format(WEEK_LABEL_DATE_FORMAT)
        )
    }

    /// Key under which this week is compared against stored labels.
    pub fn identity(&self) -> String {
        normalize_for_comparison(&self.label())
    }
}

impl fmt::Display for WeeklyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// An inclusive date range parsed out of a week label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// An inclusive window used to filter daily records before aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// The full calendar week before the one containing `today`.
    pub fn previous_calendar_week(today: NaiveDate, week_start: Weekday) -> Self {
        let previous = week_key_for_date(today, week_start).previous();
        Self::new(previous.start(), previous.end())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Convert a `0 = Sunday .. 6 = Saturday` index into a weekday.
pub fn weekday_from_index(index: u8) -> Result<Weekday, WeekKeyError> {
    match index {
        0 => Ok(Weekday::Sun),
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        other => Err(WeekKeyError::InvalidWeekday(other)),
    }
}

/// The week containing `date` that begins on the closest `week_start` on or before it.
pub fn week_key_for_date(date: NaiveDate, week_start: Weekday) -> WeeklyKey {
    let offset = (date.weekday().num_days_from_sunday() + 7 - week_start.num_days_from_sunday()) % 7;
    WeeklyKey::starting(date - Duration::days(offset as i64))
}

/// Resolve a textual date to its week.
pub fn week_key_for(date: &str, week_start: Weekday) -> Result<WeeklyKey, WeekKeyError> {
    let parsed = parse_calendar_date(date).ok_or_else(|| WeekKeyError::InvalidDate(date.to_string()))?;
    Ok(week_key_for_date(parsed, week_start))
}

/// Parse a single `YYYY/MM/DD` date, tolerating `-`, `_` and `.` as separators
/// and missing zero padding.
pub fn parse_calendar_date(value: &str) -> Option<NaiveDate> {
    let groups = digit_groups(value);
    if groups.len() != 3 {
        return None;
    }
    date_from_groups(&groups)
}

/// Parse a week label into its date range.
///
/// Labels carrying two dates yield exactly those dates. A label carrying one
/// date is taken as the start of a seven-day week. Returns `None` when the
/// range cannot be determined; callers must not read that as an empty range.
pub fn range_for_key(key: &str) -> Option<DateRange> {
    let groups = digit_groups(key);
    match groups.len() {
        3 => {
            let start = date_from_groups(&groups)?;
            Some(DateRange {
                start,
                end: start + Duration::days(6),
            })
        }
        6 => {
            let start = date_from_groups(&groups[..3])?;
            let end = date_from_groups(&groups[3..])?;
            Some(DateRange { start, end })
        }
        _ => None,
    }
}

/// Parse a week label into a [`WeeklyKey`] anchored on its start date.
pub fn parse_week_key(key: &str) -> Option<WeeklyKey> {
    range_for_key(key).map(|range| WeeklyKey::starting(range.start))
}

/// Textual normalization of a week label.
///
/// Strips whitespace, folds `/` and `_` into `-`, collapses runs of `-` and
/// lower-cases the result.
pub fn normalize_for_comparison(key: &str) -> String {
    let mut normalized = String::with_capacity(key.len());
    for c in key.chars() {
        if c.is_whitespace() {
            continue;
        }
        let c = match c {
            '/' | '_' => '-',
            other => other,
        };
        if c == '-' && normalized.ends_with('-') {
            continue;
        }
        normalized.extend(c.to_lowercase());
    }
    normalized
}

/// Equality key for week labels.
///
/// Labels that parse to a date range compare by their canonical form, so
/// padding and separator drift collapse to one key. Anything else falls back
/// to [`normalize_for_comparison`].
pub fn identity_key(key: &str) -> String {
    match range_for_key(key) {
        Some(range) => normalize_for_comparison(&format!(
            "{} - {}",
            range.start.format(WEEK_LABEL_DATE_FORMAT),
            range.end.format(WEEK_LABEL_DATE_FORMAT)
        )),
        None => normalize_for_comparison(key),
    }
}

/// Whether `value` is a bare number (a spreadsheet serial or stray count)
/// rather than a week label.
pub fn is_numeric_not_a_week(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
        && !trimmed.chars().skip(1).any(|c| c == '-')
        && trimmed.parse::<f64>().is_ok()
}

fn digit_groups(value: &str) -> Vec<&str> {
    value
        .split(|c: char| !c.is_ascii_digit())
        .filter(|group| !group.is_empty())
        .collect()
}

fn date_from_groups(groups: &[&str]) -> Option<NaiveDate> {
    let [year, month, day] = groups else {
        return None;
    };
    if year.len() != 4 {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}
