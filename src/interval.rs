//! Interval Boundary Calculator
//!
//! Maps an instant and a calendar interval to the bounds of the bucket the
//! instant falls in. Buckets sit on the interval's natural grid:
//!
//! ```text
//! minute  2024-01-17 14:35  →  [14:35, 14:36)
//! hour    2024-01-17 14:35  →  [14:00, 15:00)
//! day     2024-01-17 14:35  →  2024-01-17 00:00 (single point, begin == end)
//! week    2024-01-17 14:35  →  [Mon 2024-01-15, Mon 2024-01-22)
//! month   2024-01-17 14:35  →  [2024-01-01, 2024-02-01)
//! year    2024-01-17 14:35  →  [2024-01-01, 2024-12-31]
//! ```
//!
//! Day and year bounds are deliberately irregular: day bounds mark a single
//! point (`for_day` filters on the calendar date instead), and the year end
//! is Dec 31 00:00 rather than Jan 1 of the following year.

use crate::error::{StatsError, StatsResult};
use crate::time::ToInstant;
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Calendar interval used for bucketing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[serde(alias = "minutes")]
    Minute,
    #[serde(alias = "hours")]
    Hour,
    #[serde(alias = "days")]
    Day,
    /// Monday-start, 7-day span
    #[serde(alias = "weeks")]
    Week,
    #[serde(alias = "months")]
    Month,
    #[serde(alias = "years")]
    Year,
}

/// Bounds of one interval bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub begin: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Bounds {
    pub fn new(begin: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { begin, end }
    }
}

impl Interval {
    /// All supported intervals, finest first
    pub const ALL: [Interval; 6] = [
        Interval::Minute,
        Interval::Hour,
        Interval::Day,
        Interval::Week,
        Interval::Month,
        Interval::Year,
    ];

    /// Singular name, as used for single-bucket lookups
    pub fn name(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Plural name, as used for time series
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Minute => "minutes",
            Self::Hour => "hours",
            Self::Day => "days",
            Self::Week => "weeks",
            Self::Month => "months",
            Self::Year => "years",
        }
    }

    /// Compute the bounds of the bucket containing `instant`
    pub fn bounds(&self, instant: impl ToInstant) -> Bounds {
        let dt = instant.to_instant();
        let date = dt.date();
        let day = date.and_time(NaiveTime::MIN);

        match self {
            Self::Minute => {
                let begin = dt
                    .with_second(0)
                    .and_then(|d| d.with_nanosecond(0))
                    .unwrap_or(dt);
                Bounds::new(begin, self.step(begin))
            }
            Self::Hour => {
                let begin = dt
                    .with_minute(0)
                    .and_then(|d| d.with_second(0))
                    .and_then(|d| d.with_nanosecond(0))
                    .unwrap_or(dt);
                Bounds::new(begin, self.step(begin))
            }
            Self::Day => Bounds::new(day, day),
            Self::Week => {
                let days_since_monday = date.weekday().num_days_from_monday() as i64;
                let begin = day
                    .checked_sub_signed(Duration::days(days_since_monday))
                    .unwrap_or(NaiveDateTime::MIN);
                Bounds::new(begin, self.step(begin))
            }
            Self::Month => {
                let begin = date.with_day(1).unwrap_or(date).and_time(NaiveTime::MIN);
                Bounds::new(begin, self.step(begin))
            }
            Self::Year => {
                let begin = NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date);
                let end = NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date);
                Bounds::new(begin.and_time(NaiveTime::MIN), end.and_time(NaiveTime::MIN))
            }
        }
    }

    /// Start of the bucket containing `instant`
    pub fn truncate(&self, instant: impl ToInstant) -> NaiveDateTime {
        self.bounds(instant).begin
    }

    /// Advance by exactly one interval unit
    ///
    /// Month and year steps are calendar-aware; from a grid-aligned start
    /// they always land on the first of the month. Saturates at the end of
    /// chrono's representable range.
    pub fn step(&self, dt: NaiveDateTime) -> NaiveDateTime {
        let next = match self {
            Self::Minute => dt.checked_add_signed(Duration::minutes(1)),
            Self::Hour => dt.checked_add_signed(Duration::hours(1)),
            Self::Day => dt.checked_add_signed(Duration::days(1)),
            Self::Week => dt.checked_add_signed(Duration::days(7)),
            Self::Month => dt.checked_add_months(Months::new(1)),
            Self::Year => dt.checked_add_months(Months::new(12)),
        };
        next.unwrap_or(NaiveDateTime::MAX)
    }

    /// Iterate the aligned bucket starts covering `[start, end)`
    pub fn buckets(&self, start: impl ToInstant, end: impl ToInstant) -> Buckets {
        Buckets {
            interval: *self,
            next: Some(self.truncate(start)),
            end: end.to_instant(),
        }
    }
}

impl FromStr for Interval {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minute" | "minutes" => Ok(Self::Minute),
            "hour" | "hours" => Ok(Self::Hour),
            "day" | "days" => Ok(Self::Day),
            "week" | "weeks" => Ok(Self::Week),
            "month" | "months" => Ok(Self::Month),
            "year" | "years" => Ok(Self::Year),
            _ => Err(StatsError::InvalidInterval(s.to_string())),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Iterator over aligned bucket starts, see [`Interval::buckets`]
#[derive(Debug, Clone)]
pub struct Buckets {
    interval: Interval,
    next: Option<NaiveDateTime>,
    end: NaiveDateTime,
}

impl Iterator for Buckets {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.filter(|dt| *dt < self.end)?;
        let following = self.interval.step(current);
        self.next = (following > current).then_some(following);
        Some(current)
    }
}

/// Compute the bounds of the `interval_name` bucket containing `instant`
///
/// Fails with [`StatsError::InvalidInterval`] for unknown interval names.
pub fn get_bounds(instant: impl ToInstant, interval_name: &str) -> StatsResult<Bounds> {
    let interval: Interval = interval_name.parse()?;
    Ok(interval.bounds(instant))
}
