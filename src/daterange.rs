use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATETIME_INPUT_FORMATS: [&str; 2] = [DATETIME_FORMAT, "%Y/%m/%d %H:%M:%S"];
const DATE_INPUT_FORMATS: [&str; 2] = [DATE_FORMAT, "%Y/%m/%d"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("'{0}' is not a date (use YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)")]
    InvalidBound(String),
    #[error("range starts after it ends")]
    Reversed,
}

/// Inclusive date-time range. An unset bound leaves that side open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTimeRange {
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

impl DateTimeRange {
    pub fn new(from: Option<NaiveDateTime>, to: Option<NaiveDateTime>) -> Self {
        Self { from, to }
    }

    /// Range from typed bounds; the start may not lie after the end.
    pub fn checked(
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> Result<Self, RangeError> {
        if let (Some(from), Some(to)) = (from, to)
            && from > to
        {
            return Err(RangeError::Reversed);
        }
        Ok(Self { from, to })
    }

    pub fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, value: NaiveDateTime) -> bool {
        self.from.is_none_or(|from| value >= from) && self.to.is_none_or(|to| value <= to)
    }
}

impl fmt::Display for DateTimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |v: Option<NaiveDateTime>| {
            v.map(|v| v.format(DATETIME_FORMAT).to_string())
                .unwrap_or_else(|| "…".to_string())
        };
        write!(f, "{} ~ {}", side(self.from), side(self.to))
    }
}

/// Parses a table cell holding a date or a date-time.
/// Plain dates are read as midnight.
pub fn parse_cell(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    DATETIME_INPUT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATE_INPUT_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
                .map(start_of_day)
        })
}

/// Parses one typed bound of a custom range. Empty input leaves the side open.
/// A plain date as the upper bound covers that whole day.
pub fn parse_bound(value: &str, upper: bool) -> Result<Option<NaiveDateTime>, RangeError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let date = DATE_INPUT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok());
    match date {
        Some(date) if upper => Ok(Some(end_of_day(date))),
        _ => parse_cell(value)
            .map(Some)
            .ok_or_else(|| RangeError::InvalidBound(value.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Today,
    Yesterday,
    Last7,
    Last14,
    Last30,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
}

pub const PRESETS: [Preset; 9] = [
    Preset::Today,
    Preset::Yesterday,
    Preset::Last7,
    Preset::Last14,
    Preset::Last30,
    Preset::ThisWeek,
    Preset::LastWeek,
    Preset::ThisMonth,
    Preset::LastMonth,
];

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    start_of_day(date) + TimeDelta::days(1) - TimeDelta::seconds(1)
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - TimeDelta::days(date.day0() as i64)
}

impl Preset {
    pub fn label(&self) -> &'static str {
        match self {
            Preset::Today => "Today",
            Preset::Yesterday => "Yesterday",
            Preset::Last7 => "Last 7 days",
            Preset::Last14 => "Last 14 days",
            Preset::Last30 => "Last 30 days",
            Preset::ThisWeek => "This Week",
            Preset::LastWeek => "Last Week",
            Preset::ThisMonth => "This Month",
            Preset::LastMonth => "Last Month",
        }
    }

    /// Range covered by the preset, relative to `now`. Weeks start on Monday.
    pub fn range(&self, now: NaiveDateTime) -> DateTimeRange {
        let today = now.date();
        let days = |n: i64| TimeDelta::days(n);
        let (from, to) = match self {
            Preset::Today => (today, today),
            Preset::Yesterday => (today - days(1), today - days(1)),
            Preset::Last7 => (today - days(6), today),
            Preset::Last14 => (today - days(13), today),
            Preset::Last30 => (today - days(29), today),
            Preset::ThisWeek => {
                let monday = today - days(today.weekday().num_days_from_monday() as i64);
                (monday, monday + days(6))
            }
            Preset::LastWeek => {
                let monday = today - days(today.weekday().num_days_from_monday() as i64 + 7);
                (monday, monday + days(6))
            }
            Preset::ThisMonth => {
                let first = first_of_month(today);
                let next = first_of_month(first + days(32));
                (first, next - days(1))
            }
            Preset::LastMonth => {
                let last = first_of_month(today) - days(1);
                (first_of_month(last), last)
            }
        };
        DateTimeRange::new(Some(start_of_day(from)), Some(end_of_day(to)))
    }
}
