//! Cron expression parsing and next-run resolution.
//!
//! Supports standard 5-field cron expressions:
//! ```text
//! ┌───────────── minute (0-59)
//! │ ┌───────────── hour (0-23)
//! │ │ ┌───────────── day of month (1-31)
//! │ │ │ ┌───────────── month (1-12 or JAN-DEC)
//! │ │ │ │ ┌───────────── day of week (0-7 or SUN-SAT, 0 and 7 = Sunday)
//! │ │ │ │ │
//! * * * * *
//! ```
//!
//! When both day fields are restricted a day matches if either one matches,
//! as in classic cron.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How far ahead `next_after` searches before giving up (covers Feb 29 schedules).
const MAX_SEARCH_DAYS: i64 = 366 * 8;

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Errors that can occur when parsing cron expressions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronParseError {
    #[error("expected 5 fields, got {0}")]
    InvalidFieldCount(usize),
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("value {value} is out of range [{min}, {max}] in '{field}'")]
    OutOfRange {
        field: String,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("invalid range: {0}-{1}")]
    InvalidRange(u32, u32),
    #[error("invalid step value: {0}")]
    InvalidStep(String),
    #[error("'{0}' never fires")]
    NeverFires(String),
}

/// A single field in a cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronField {
    /// The set of valid values for this field.
    pub values: BTreeSet<u32>,
    min: u32,
    max: u32,
    /// False when the field was written starting with `*`.
    restricted: bool,
}

impl CronField {
    fn parse(expr: &str, min: u32, max: u32, names: &[&str]) -> Result<Self, CronParseError> {
        let mut field = Self {
            values: BTreeSet::new(),
            min,
            max,
            restricted: !expr.starts_with('*'),
        };
        for part in expr.split(',') {
            field.parse_part(part.trim(), names)?;
        }
        Ok(field)
    }

    /// Parse a single part of a field expression (`*`, `5`, `1-5`, `*/15`, `10-40/10`).
    fn parse_part(&mut self, part: &str, names: &[&str]) -> Result<(), CronParseError> {
        let (range_part, step) = match part.split_once('/') {
            Some((range, step_str)) => {
                let step = step_str
                    .parse::<u32>()
                    .map_err(|_| CronParseError::InvalidStep(step_str.to_string()))?;
                if step == 0 {
                    return Err(CronParseError::InvalidStep("0".to_string()));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range_part == "*" {
            (self.min, self.max)
        } else if let Some((lo, hi)) = range_part.split_once('-') {
            let start = self.parse_value(lo, range_part, names)?;
            let end = self.parse_value(hi, range_part, names)?;
            if start > end {
                return Err(CronParseError::InvalidRange(start, end));
            }
            (start, end)
        } else {
            let value = self.parse_value(range_part, range_part, names)?;
            // `5/10` means "from 5 to the end, every 10"
            match step {
                Some(_) => (value, self.max),
                None => (value, value),
            }
        };

        let step = step.unwrap_or(1);
        let mut value = start;
        while value <= end {
            self.values.insert(value);
            value += step;
        }

        Ok(())
    }

    fn parse_value(&self, token: &str, field: &str, names: &[&str]) -> Result<u32, CronParseError> {
        let upper = token.to_ascii_uppercase();
        let value = match names.iter().position(|name| *name == upper) {
            // Month names start at 1, weekday names at 0
            Some(idx) => idx as u32 + self.min,
            None => token.parse::<u32>().map_err(|_| CronParseError::InvalidField {
                field: field.to_string(),
                reason: format!("'{}' is not a number", token),
            })?,
        };

        if value < self.min || value > self.max {
            return Err(CronParseError::OutOfRange {
                field: field.to_string(),
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(value)
    }

    /// Check if a value matches this field.
    pub fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

/// A parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronSchedule {
    /// Parse a cron expression, rejecting expressions that can never fire.
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronParseError::InvalidFieldCount(parts.len()));
        }

        let mut day_of_week = CronField::parse(parts[4], 0, 7, WEEKDAY_NAMES)?;
        if day_of_week.values.remove(&7) {
            day_of_week.values.insert(0);
        }

        let schedule = Self {
            expr: parts.join(" "),
            minute: CronField::parse(parts[0], 0, 59, &[])?,
            hour: CronField::parse(parts[1], 0, 23, &[])?,
            day_of_month: CronField::parse(parts[2], 1, 31, &[])?,
            month: CronField::parse(parts[3], 1, 12, MONTH_NAMES)?,
            day_of_week,
        };

        if schedule.next_after(&Utc::now()).is_none() {
            return Err(CronParseError::NeverFires(schedule.expr));
        }
        Ok(schedule)
    }

    /// The normalized expression
    pub fn expr(&self) -> &str {
        &self.expr
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.day_of_month.matches(date.day());
        let dow = self.day_of_week.matches(date.weekday().num_days_from_sunday());
        match (self.day_of_month.restricted, self.day_of_week.restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// Check if a local wall-clock time matches this schedule.
    pub fn matches(&self, dt: &NaiveDateTime) -> bool {
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.month.matches(dt.month())
            && self.day_matches(dt.date())
    }

    /// First fire time strictly after `after`, evaluated in `after`'s time zone.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start = after
            .naive_local()
            .with_second(0)?
            .with_nanosecond(0)?
            + Duration::minutes(1);
        let limit = start + Duration::days(MAX_SEARCH_DAYS);

        let mut current = start;
        while current <= limit {
            if !self.month.matches(current.month()) {
                current = first_of_next_month(current)?;
                continue;
            }
            if !self.day_matches(current.date()) {
                current = current.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hour.matches(current.hour()) {
                current = current.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.matches(current.minute()) {
                current += Duration::minutes(1);
                continue;
            }
            // Local times skipped by a DST jump do not exist; keep searching
            if let Some(dt) = tz.from_local_datetime(&current).earliest() {
                return Some(dt);
            }
            current += Duration::minutes(1);
        }

        None
    }

    /// Time from `now` until the next fire. Never zero: a fire time equal to
    /// `now` is skipped in favor of the following one.
    pub fn until_next<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<std::time::Duration> {
        let next = self.next_after(now)?;
        next.signed_duration_since(now.clone()).to_std().ok()
    }

    /// Nominal rate: the distance between the next two fire times after `now`.
    pub fn interval<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<std::time::Duration> {
        let first = self.next_after(now)?;
        let second = self.next_after(&first)?;
        second.signed_duration_since(first).to_std().ok()
    }
}

fn first_of_next_month(dt: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

impl FromStr for CronSchedule {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronSchedule::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_interval_every_minute() {
        let cron = CronSchedule::parse("* * * * *").unwrap();
        let interval = cron.interval(&at(2024, 1, 15, 14, 30, 12)).unwrap();
        assert_eq!(interval.as_secs(), 60);
    }

    #[test]
    fn test_interval_every_15_minutes() {
        let cron = CronSchedule::parse("*/15 * * * *").unwrap();
        let interval = cron.interval(&at(2024, 1, 15, 14, 30, 0)).unwrap();
        assert_eq!(interval.as_secs(), 900);
    }

    #[test]
    fn test_interval_every_3_hours() {
        let cron = CronSchedule::parse("0 */3 * * *").unwrap();
        let interval = cron.interval(&at(2024, 1, 15, 14, 30, 0)).unwrap();
        assert_eq!(interval.as_secs(), 10800);

        // Across midnight as well
        let interval = cron.interval(&at(2024, 1, 15, 19, 0, 0)).unwrap();
        assert_eq!(interval.as_secs(), 10800);
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(
            CronSchedule::parse("not a cron"),
            Err(CronParseError::InvalidFieldCount(3))
        );
        assert!(CronSchedule::parse("a b c d e").is_err());
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-1 * * * *").is_err());
    }

    #[test]
    fn test_rejects_never_firing() {
        assert!(matches!(
            CronSchedule::parse("0 0 31 2 *"),
            Err(CronParseError::NeverFires(_))
        ));
    }

    #[test]
    fn test_until_next_is_never_zero() {
        let cron = CronSchedule::parse("30 14 * * *").unwrap();
        // Exactly on a fire time: the next run is a day later
        let wait = cron.until_next(&at(2024, 1, 15, 14, 30, 0)).unwrap();
        assert_eq!(wait.as_secs(), 24 * 3600);

        let wait = cron.until_next(&at(2024, 1, 15, 14, 29, 30)).unwrap();
        assert_eq!(wait.as_secs(), 30);
    }

    #[test]
    fn test_next_after_month_and_year_rollover() {
        let cron = CronSchedule::parse("0 0 1 JAN *").unwrap();
        let next = cron.next_after(&at(2024, 3, 10, 8, 0, 0)).unwrap();
        assert_eq!(next, at(2025, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_day_of_week_names_and_sunday_seven() {
        let weekdays = CronSchedule::parse("0 9 * * MON-FRI").unwrap();
        // 2024-01-13 is a Saturday
        let next = weekdays.next_after(&at(2024, 1, 13, 10, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 15, 9, 0, 0));

        let sunday = CronSchedule::parse("0 0 * * 7").unwrap();
        let next = sunday.next_after(&at(2024, 1, 15, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 21, 0, 0, 0));
    }

    #[test]
    fn test_day_fields_are_ored_when_both_restricted() {
        // The 20th or any Monday
        let cron = CronSchedule::parse("0 0 20 * 1").unwrap();
        let next = cron.next_after(&at(2024, 1, 16, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 1, 20, 0, 0, 0));
        let next = cron.next_after(&next).unwrap();
        assert_eq!(next, at(2024, 1, 22, 0, 0, 0));
    }

    #[test]
    fn test_lists_ranges_and_offset_steps() {
        let cron = CronSchedule::parse("5,10-12,30/15 * * * *").unwrap();
        let minutes: Vec<u32> = cron.minute.values.iter().copied().collect();
        assert_eq!(minutes, vec![5, 10, 11, 12, 30, 45]);
    }

    #[test]
    fn test_display_normalizes_whitespace() {
        let cron: CronSchedule = "*/5   *  * * *".parse().unwrap();
        assert_eq!(cron.to_string(), "*/5 * * * *");
    }
}
