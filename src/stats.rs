//! Stats Facade
//!
//! [`QueryStats`] binds a [`QuerySource`] to default field, aggregate and
//! operator settings and answers three kinds of question:
//!
//! - **Snapshots**: the aggregate for the minute/hour/day/week/month/year
//!   containing an instant (`for_*`) or today (`this_*`)
//! - **Pivots**: the cumulative aggregate before or after an instant
//!   (`until`, `after`, `pivot`)
//! - **Time series**: one aggregate per bucket over a range
//!
//! # Time series paths
//!
//! ```text
//! time_series(start, end, interval)
//!   ├─ fast: filter_range(first, last + 1) → group_aggregate(native expr) → fill gaps with 0
//!   └─ on any fast-path error, once:
//!      slow: for bucket in grid { for_interval(interval, bucket) }
//! ```
//!
//! # Cached today
//!
//! "Today" is read from the clock once at construction so a batch of
//! `this_*` calls agrees on the date. Long-lived instances go stale across
//! midnight until [`QueryStats::update_today`] is called.

use crate::config::StatsConfig;
use crate::engine::{parse_bucket_key, EngineRegistry, Truncation};
use crate::error::{StatsError, StatsResult};
use crate::interval::Interval;
use crate::source::{Aggregate, Operator, QuerySource, SourceError};
use crate::time::ToInstant;
use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where "now" and "today" come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Clock {
    /// UTC wall clock
    Utc,
    /// System local wall clock
    #[default]
    Local,
    /// A frozen instant, for reproducible reports
    Fixed(NaiveDateTime),
}

impl Clock {
    pub fn now(&self) -> NaiveDateTime {
        match self {
            Self::Utc => Utc::now().naive_utc(),
            Self::Local => Local::now().naive_local(),
            Self::Fixed(dt) => *dt,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Per-call overrides of the instance defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub date_field: Option<String>,
    pub aggregate_field: Option<String>,
    pub aggregate: Option<Aggregate>,
    /// Backend identifier for the fast time-series path
    pub engine: Option<String>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn date_field(mut self, field: impl Into<String>) -> Self {
        self.date_field = Some(field.into());
        self
    }

    pub fn aggregate_field(mut self, field: impl Into<String>) -> Self {
        self.aggregate_field = Some(field.into());
        self
    }

    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }
}

/// One time-series entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Bucket start
    pub bucket: NaiveDateTime,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(bucket: NaiveDateTime, value: f64) -> Self {
        Self { bucket, value }
    }
}

/// Settings resolved for a single call
struct Resolved<'a, S> {
    source: &'a S,
    date_field: &'a str,
    aggregate_field: &'a str,
    aggregate: Aggregate,
}

/// Aggregate statistics over a query source, bucketed by calendar interval
///
/// # Example
///
/// ```
/// use qstats::{Clock, Interval, MemorySource, Overrides, QueryStats, Record};
/// use chrono::NaiveDate;
///
/// let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
/// let at = |d: u32| day.and_hms_opt(9, 0, 0).unwrap() + chrono::Duration::days(d as i64);
///
/// let source = MemorySource::new(vec![
///     Record::new().number("id", 1.0).datetime("created", at(0)),
///     Record::new().number("id", 2.0).datetime("created", at(0)),
///     Record::new().number("id", 3.0).datetime("created", at(2)),
/// ]);
///
/// let stats = QueryStats::new(source, "created").with_clock(Clock::Fixed(at(0)));
/// assert_eq!(stats.this_day(&Overrides::new()).unwrap(), 2.0);
///
/// let series = stats
///     .time_series(day, Some(at(3)), Interval::Day, &Overrides::new())
///     .unwrap();
/// let values: Vec<f64> = series.iter().map(|p| p.value).collect();
/// assert_eq!(values, vec![2.0, 0.0, 1.0, 0.0]);
/// ```
#[derive(Debug)]
pub struct QueryStats<S> {
    source: Option<S>,
    config: StatsConfig,
    engines: EngineRegistry,
    clock: Clock,
    today: NaiveDate,
}

impl<S: QuerySource> QueryStats<S> {
    /// Create stats over `source` counting records by `date_field`
    pub fn new(source: S, date_field: impl Into<String>) -> Self {
        let config = StatsConfig {
            date_field: Some(date_field.into()),
            ..StatsConfig::default()
        };
        Self::from_config(Some(source), config)
    }

    /// Create stats from an explicit configuration
    ///
    /// Both the source and the date field may be absent; queries then fail
    /// with [`StatsError::QuerySetMissing`] or [`StatsError::DateFieldMissing`].
    pub fn from_config(source: Option<S>, config: StatsConfig) -> Self {
        let clock = config.clock;
        Self {
            source,
            config,
            engines: EngineRegistry::builtin(),
            today: clock.today(),
            clock,
        }
    }

    /// Builder method: replace the bucket strategy registry
    pub fn with_engines(mut self, engines: EngineRegistry) -> Self {
        self.engines = engines;
        self
    }

    /// Builder method: replace the clock and re-read today
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self.config.clock = clock;
        self.update_today();
        self
    }

    /// Re-read today from the clock
    pub fn update_today(&mut self) {
        self.today = self.clock.today();
        tracing::debug!(today = %self.today, "Refreshed cached today");
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Current instant according to the clock
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub fn source(&self) -> Option<&S> {
        self.source.as_ref()
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    fn resolve<'a>(&'a self, opts: &'a Overrides) -> StatsResult<Resolved<'a, S>> {
        let date_field = opts
            .date_field
            .as_deref()
            .or(self.config.date_field.as_deref())
            .filter(|f| !f.is_empty())
            .ok_or(StatsError::DateFieldMissing)?;
        let source = self.source.as_ref().ok_or(StatsError::QuerySetMissing)?;

        Ok(Resolved {
            source,
            date_field,
            aggregate_field: opts
                .aggregate_field
                .as_deref()
                .unwrap_or(&self.config.aggregate_field),
            aggregate: opts.aggregate.unwrap_or(self.config.aggregate),
        })
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Aggregate over `date_field` in `[begin, end)`
    pub fn get_aggregate(
        &self,
        begin: NaiveDateTime,
        end: NaiveDateTime,
        opts: &Overrides,
    ) -> StatsResult<f64> {
        let r = self.resolve(opts)?;
        let value = r
            .source
            .filter_range(r.date_field, begin, end)
            .aggregate(r.aggregate_field, r.aggregate)?;
        Ok(value)
    }

    /// Aggregate for the `interval` bucket containing `at`
    pub fn for_interval(
        &self,
        interval: Interval,
        at: impl ToInstant,
        opts: &Overrides,
    ) -> StatsResult<f64> {
        match interval {
            Interval::Day => self.for_day(at, opts),
            Interval::Minute | Interval::Hour | Interval::Week | Interval::Month | Interval::Year => {
                let bounds = interval.bounds(at);
                self.get_aggregate(bounds.begin, bounds.end, opts)
            }
        }
    }

    pub fn for_minute(&self, at: impl ToInstant, opts: &Overrides) -> StatsResult<f64> {
        self.for_interval(Interval::Minute, at, opts)
    }

    pub fn for_hour(&self, at: impl ToInstant, opts: &Overrides) -> StatsResult<f64> {
        self.for_interval(Interval::Hour, at, opts)
    }

    /// Aggregate for the calendar date of `at`
    ///
    /// Filters on year/month/day equality rather than a range.
    pub fn for_day(&self, at: impl ToInstant, opts: &Overrides) -> StatsResult<f64> {
        let r = self.resolve(opts)?;
        let dt = at.to_instant();
        let value = r
            .source
            .filter_exact(r.date_field, dt.year(), dt.month(), dt.day())
            .aggregate(r.aggregate_field, r.aggregate)?;
        Ok(value)
    }

    pub fn for_week(&self, at: impl ToInstant, opts: &Overrides) -> StatsResult<f64> {
        self.for_interval(Interval::Week, at, opts)
    }

    pub fn for_month(&self, at: impl ToInstant, opts: &Overrides) -> StatsResult<f64> {
        self.for_interval(Interval::Month, at, opts)
    }

    /// Aggregate for the year of `at`, from Jan 1 up to (not including) Dec 31
    pub fn for_year(&self, at: impl ToInstant, opts: &Overrides) -> StatsResult<f64> {
        self.for_interval(Interval::Year, at, opts)
    }

    /// Aggregate for the `interval` bucket containing today's midnight
    pub fn this_interval(&self, interval: Interval, opts: &Overrides) -> StatsResult<f64> {
        self.for_interval(interval, self.today, opts)
    }

    pub fn this_minute(&self, opts: &Overrides) -> StatsResult<f64> {
        self.this_interval(Interval::Minute, opts)
    }

    pub fn this_hour(&self, opts: &Overrides) -> StatsResult<f64> {
        self.this_interval(Interval::Hour, opts)
    }

    pub fn this_day(&self, opts: &Overrides) -> StatsResult<f64> {
        self.this_interval(Interval::Day, opts)
    }

    pub fn this_week(&self, opts: &Overrides) -> StatsResult<f64> {
        self.this_interval(Interval::Week, opts)
    }

    pub fn this_month(&self, opts: &Overrides) -> StatsResult<f64> {
        self.this_interval(Interval::Month, opts)
    }

    pub fn this_year(&self, opts: &Overrides) -> StatsResult<f64> {
        self.this_interval(Interval::Year, opts)
    }

    // ------------------------------------------------------------------
    // Pivots
    // ------------------------------------------------------------------

    /// Aggregate over records with `date_field <operator> at`
    ///
    /// `None` uses the configured default operator.
    pub fn pivot(
        &self,
        at: impl ToInstant,
        operator: Option<Operator>,
        opts: &Overrides,
    ) -> StatsResult<f64> {
        let op = operator.unwrap_or(self.config.operator);
        let r = self.resolve(opts)?;
        let value = r
            .source
            .filter_compare(r.date_field, op, at.to_instant())
            .aggregate(r.aggregate_field, r.aggregate)?;
        Ok(value)
    }

    /// [`pivot`](Self::pivot) with an operator given as text (`lte`, `<=`, ...)
    ///
    /// Unknown operators fail with [`StatsError::InvalidOperator`] before any query.
    pub fn pivot_str(&self, at: impl ToInstant, operator: &str, opts: &Overrides) -> StatsResult<f64> {
        let op: Operator = operator.parse()?;
        self.pivot(at, Some(op), opts)
    }

    /// Cumulative aggregate up to and including `at`
    pub fn until(&self, at: impl ToInstant, opts: &Overrides) -> StatsResult<f64> {
        self.pivot(at, Some(Operator::Lte), opts)
    }

    pub fn until_now(&self, opts: &Overrides) -> StatsResult<f64> {
        self.until(self.now(), opts)
    }

    /// Cumulative aggregate from `at` onwards
    pub fn after(&self, at: impl ToInstant, opts: &Overrides) -> StatsResult<f64> {
        self.pivot(at, Some(Operator::Gte), opts)
    }

    pub fn after_now(&self, opts: &Overrides) -> StatsResult<f64> {
        self.after(self.now(), opts)
    }

    // ------------------------------------------------------------------
    // Time series
    // ------------------------------------------------------------------

    /// One aggregate per `interval` bucket covering `[start, end)`
    ///
    /// `end` defaults to the day after the cached today. The native grouped
    /// aggregation is tried first; any failure there falls back once to one
    /// snapshot query per bucket.
    pub fn time_series(
        &self,
        start: impl ToInstant,
        end: Option<NaiveDateTime>,
        interval: Interval,
        opts: &Overrides,
    ) -> StatsResult<Vec<SeriesPoint>> {
        let r = self.resolve(opts)?;
        let end = end.unwrap_or_else(|| (self.today + Duration::days(1)).to_instant());
        let grid: Vec<NaiveDateTime> = interval.buckets(start, end).collect();

        match self.fast_time_series(&r, &grid, interval, opts) {
            Ok(series) => Ok(series),
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    interval = %interval,
                    buckets = grid.len(),
                    "Native grouping unavailable, querying per bucket"
                );
                self.slow_time_series(&grid, interval, opts)
            }
        }
    }

    fn slow_time_series(
        &self,
        grid: &[NaiveDateTime],
        interval: Interval,
        opts: &Overrides,
    ) -> StatsResult<Vec<SeriesPoint>> {
        grid.iter()
            .map(|&bucket| {
                tracing::trace!(bucket = %bucket, "Per-bucket aggregate");
                let value = self.for_interval(interval, bucket, opts)?;
                Ok(SeriesPoint::new(bucket, value))
            })
            .collect()
    }

    fn fast_time_series(
        &self,
        r: &Resolved<'_, S>,
        grid: &[NaiveDateTime],
        interval: Interval,
        opts: &Overrides,
    ) -> StatsResult<Vec<SeriesPoint>> {
        let engine = opts
            .engine
            .as_deref()
            .or(self.config.engine.as_deref())
            .or(r.source.engine())
            .ok_or_else(|| StatsError::UnsupportedEngine("no engine configured".to_string()))?;
        let strategy = self.engines.get(engine)?;
        let expression = strategy.expression(interval, r.date_field).ok_or_else(|| {
            StatsError::InvalidInterval(format!(
                "{} is not supported for the {} backend",
                interval.plural(),
                engine
            ))
        })?;

        let (Some(&first), Some(&last)) = (grid.first(), grid.last()) else {
            return Ok(Vec::new());
        };

        let truncation = Truncation {
            engine: engine.to_string(),
            interval,
            date_field: r.date_field.to_string(),
            expression,
        };
        let groups = r
            .source
            .filter_range(r.date_field, first, interval.step(last))
            .group_aggregate(&truncation, r.aggregate_field, r.aggregate)?;

        let mut by_bucket = HashMap::with_capacity(groups.len());
        for (key, value) in groups {
            let bucket = parse_bucket_key(&key).ok_or(SourceError::BadBucketKey(key))?;
            by_bucket.insert(bucket, value);
        }

        Ok(grid
            .iter()
            .map(|&bucket| SeriesPoint::new(bucket, by_bucket.get(&bucket).copied().unwrap_or(0.0)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BucketStrategy, SqliteEngine};
    use crate::source::{MemorySource, Record, SourceResult, SqliteSource};
    use rusqlite::Connection;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    /// Monday
    fn reference_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn at(days: i64, hour: u32) -> NaiveDateTime {
        (reference_day() + Duration::days(days))
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn midnight(days: i64) -> NaiveDateTime {
        at(days, 0)
    }

    /// Records on day offsets {0, 0, 1, 1, 1}
    fn sample_records() -> Vec<Record> {
        [(0, 9), (0, 17), (1, 8), (1, 12), (1, 23)]
            .iter()
            .enumerate()
            .map(|(i, &(day, hour))| {
                Record::new()
                    .number("id", i as f64 + 1.0)
                    .number("amount", 10.0 * (i as f64 + 1.0))
                    .datetime("created", at(day, hour))
            })
            .collect()
    }

    fn sample_stats() -> QueryStats<MemorySource> {
        QueryStats::new(MemorySource::new(sample_records()), "created")
            .with_clock(Clock::Fixed(at(0, 10)))
    }

    fn values(series: &[SeriesPoint]) -> Vec<f64> {
        series.iter().map(|p| p.value).collect()
    }

    /// Logs every call that reaches the source
    #[derive(Debug, Clone)]
    struct Recording {
        inner: MemorySource,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Recording {
        fn new(records: Vec<Record>) -> Self {
            Self {
                inner: MemorySource::new(records),
                log: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn wrap(&self, inner: MemorySource, call: &'static str) -> Self {
            self.log.borrow_mut().push(call);
            Self {
                inner,
                log: Rc::clone(&self.log),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.log.borrow().clone()
        }
    }

    impl QuerySource for Recording {
        fn filter_range(&self, field: &str, begin: NaiveDateTime, end: NaiveDateTime) -> Self {
            self.wrap(self.inner.filter_range(field, begin, end), "filter_range")
        }

        fn filter_exact(&self, field: &str, year: i32, month: u32, day: u32) -> Self {
            self.wrap(self.inner.filter_exact(field, year, month, day), "filter_exact")
        }

        fn filter_compare(&self, field: &str, op: Operator, value: NaiveDateTime) -> Self {
            self.wrap(self.inner.filter_compare(field, op, value), "filter_compare")
        }

        fn aggregate(&self, field: &str, kind: Aggregate) -> SourceResult<f64> {
            self.log.borrow_mut().push("aggregate");
            self.inner.aggregate(field, kind)
        }

        fn group_aggregate(
            &self,
            truncation: &Truncation,
            field: &str,
            kind: Aggregate,
        ) -> SourceResult<BTreeMap<String, f64>> {
            self.log.borrow_mut().push("group_aggregate");
            self.inner.group_aggregate(truncation, field, kind)
        }

        fn engine(&self) -> Option<&str> {
            self.inner.engine()
        }
    }

    #[test]
    fn test_this_day_and_five_day_window() {
        let stats = sample_stats();
        let none = Overrides::new();

        assert_eq!(stats.today(), reference_day());
        assert_eq!(stats.this_day(&none).unwrap(), 2.0);
        assert_eq!(stats.for_day(at(1, 15), &none).unwrap(), 3.0);

        let series = stats
            .time_series(reference_day(), Some(midnight(5)), Interval::Day, &none)
            .unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(values(&series), vec![2.0, 3.0, 0.0, 0.0, 0.0]);
        assert_eq!(series.iter().map(|p| p.value).sum::<f64>(), 5.0);
    }

    #[test]
    fn test_snapshots_per_interval() {
        let stats = sample_stats();
        let none = Overrides::new();

        assert_eq!(stats.this_week(&none).unwrap(), 5.0);
        assert_eq!(stats.this_month(&none).unwrap(), 5.0);
        assert_eq!(stats.this_year(&none).unwrap(), 5.0);
        assert_eq!(stats.for_hour(at(1, 12), &none).unwrap(), 1.0);
        assert_eq!(stats.for_minute(at(0, 17), &none).unwrap(), 1.0);
        // this_hour looks at today's midnight hour
        assert_eq!(stats.this_hour(&none).unwrap(), 0.0);
        assert_eq!(stats.for_week(at(7, 0), &none).unwrap(), 0.0);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let stats = sample_stats();
        let sum = Overrides::new().aggregate_field("amount").aggregate(Aggregate::Sum);

        assert_eq!(stats.this_day(&sum).unwrap(), 30.0);
        assert_eq!(stats.for_day(at(1, 0), &sum).unwrap(), 120.0);

        let wrong_field = Overrides::new().date_field("updated");
        assert_eq!(stats.this_week(&wrong_field).unwrap(), 0.0);
    }

    #[test]
    fn test_year_excludes_december_31() {
        let records = vec![
            Record::new().number("id", 1.0).datetime("created", NaiveDate::from_ymd_opt(2023, 12, 30).unwrap().to_instant()),
            Record::new().number("id", 2.0).datetime("created", NaiveDate::from_ymd_opt(2023, 12, 31).unwrap().and_hms_opt(12, 0, 0).unwrap()),
        ];
        let stats = QueryStats::new(MemorySource::new(records), "created");
        let none = Overrides::new();

        assert_eq!(stats.for_year(NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(), &none).unwrap(), 1.0);
        assert_eq!(stats.for_month(NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(), &none).unwrap(), 2.0);
    }

    #[test]
    fn test_pivots() {
        let stats = sample_stats();
        let none = Overrides::new();

        assert_eq!(stats.until(at(0, 17), &none).unwrap(), 2.0);
        assert_eq!(stats.after(at(0, 17), &none).unwrap(), 4.0);
        assert_eq!(stats.pivot(at(0, 17), Some(Operator::Lt), &none).unwrap(), 1.0);
        assert_eq!(stats.pivot(at(0, 17), Some(Operator::Gt), &none).unwrap(), 3.0);
        // default operator is lte
        assert_eq!(stats.pivot(at(0, 17), None, &none).unwrap(), 2.0);
        assert_eq!(stats.pivot_str(at(0, 17), ">=", &none).unwrap(), 4.0);

        // the fixed clock reads 10:00 on the reference day
        assert_eq!(stats.until_now(&none).unwrap(), 1.0);
        assert_eq!(stats.after_now(&none).unwrap(), 4.0);
    }

    #[test]
    fn test_configured_operator_is_default() {
        let config = StatsConfig {
            date_field: Some("created".to_string()),
            operator: Operator::Gt,
            clock: Clock::Fixed(at(0, 10)),
            ..StatsConfig::default()
        };
        let stats = QueryStats::from_config(Some(MemorySource::new(sample_records())), config);
        assert_eq!(stats.pivot(at(0, 17), None, &Overrides::new()).unwrap(), 3.0);
    }

    #[test]
    fn test_invalid_operator_issues_no_query() {
        let source = Recording::new(sample_records());
        let stats = QueryStats::new(source.clone(), "created");

        let err = stats.pivot_str(at(0, 0), "eq", &Overrides::new()).unwrap_err();
        assert!(matches!(err, StatsError::InvalidOperator(op) if op == "eq"));
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_date_field_missing_issues_no_query() {
        let source = Recording::new(sample_records());
        let stats = QueryStats::from_config(Some(source.clone()), StatsConfig::default());
        let none = Overrides::new();

        assert!(matches!(stats.this_day(&none), Err(StatsError::DateFieldMissing)));
        assert!(matches!(stats.this_month(&none), Err(StatsError::DateFieldMissing)));
        assert!(matches!(stats.this_year(&none), Err(StatsError::DateFieldMissing)));
        assert!(matches!(stats.until_now(&none), Err(StatsError::DateFieldMissing)));
        assert!(matches!(
            stats.time_series(at(0, 0), Some(midnight(3)), Interval::Day, &none),
            Err(StatsError::DateFieldMissing)
        ));
        assert!(source.calls().is_empty());

        // a per-call date field is enough
        let with_field = Overrides::new().date_field("created");
        assert_eq!(stats.for_day(at(0, 0), &with_field).unwrap(), 2.0);
    }

    #[test]
    fn test_query_set_missing() {
        let config = StatsConfig {
            date_field: Some("foo".to_string()),
            ..StatsConfig::default()
        };
        let stats: QueryStats<MemorySource> = QueryStats::from_config(None, config);
        let none = Overrides::new();

        assert!(matches!(stats.this_day(&none), Err(StatsError::QuerySetMissing)));
        assert!(matches!(stats.this_month(&none), Err(StatsError::QuerySetMissing)));
        assert!(matches!(stats.this_year(&none), Err(StatsError::QuerySetMissing)));
    }

    #[test]
    fn test_fast_path_used_when_supported() {
        let source = Recording::new(sample_records());
        let stats = QueryStats::new(source.clone(), "created");

        let series = stats
            .time_series(midnight(0), Some(midnight(5)), Interval::Day, &Overrides::new())
            .unwrap();
        assert_eq!(values(&series), vec![2.0, 3.0, 0.0, 0.0, 0.0]);
        assert_eq!(source.calls(), vec!["filter_range", "group_aggregate"]);
    }

    #[test]
    fn test_falls_back_once_on_backend_mismatch() {
        let source = Recording::new(sample_records());
        let stats = QueryStats::new(source.clone(), "created");

        let series = stats
            .time_series(
                midnight(0),
                Some(midnight(3)),
                Interval::Day,
                &Overrides::new().engine("mysql"),
            )
            .unwrap();
        assert_eq!(values(&series), vec![2.0, 3.0, 0.0]);

        let calls = source.calls();
        assert_eq!(calls.iter().filter(|c| **c == "group_aggregate").count(), 1);
        assert_eq!(calls.iter().filter(|c| **c == "aggregate").count(), 3);
    }

    #[test]
    fn test_falls_back_on_unknown_engine() {
        let source = Recording::new(sample_records());
        let stats = QueryStats::new(source.clone(), "created");

        let series = stats
            .time_series(midnight(0), Some(midnight(2)), Interval::Day, &Overrides::new().engine("oracle"))
            .unwrap();
        assert_eq!(values(&series), vec![2.0, 3.0]);
        assert!(!source.calls().contains(&"group_aggregate"));
    }

    #[test]
    fn test_falls_back_on_unsupported_interval() {
        struct DaysOnly;

        impl BucketStrategy for DaysOnly {
            fn id(&self) -> &str {
                "memory"
            }

            fn expression(&self, interval: Interval, date_field: &str) -> Option<String> {
                (interval == Interval::Day).then(|| format!("day({})", date_field))
            }
        }

        let mut engines = EngineRegistry::empty();
        engines.register(DaysOnly);
        let source = Recording::new(sample_records());
        let stats = QueryStats::new(source.clone(), "created").with_engines(engines);

        let series = stats
            .time_series(midnight(0), Some(midnight(2)), Interval::Hour, &Overrides::new())
            .unwrap();
        assert_eq!(series.len(), 48);
        assert_eq!(series.iter().map(|p| p.value).sum::<f64>(), 5.0);
        assert!(!source.calls().contains(&"group_aggregate"));
    }

    /// Implements only the required filter and aggregate methods
    #[derive(Debug, Clone)]
    struct Minimal(MemorySource);

    impl QuerySource for Minimal {
        fn filter_range(&self, field: &str, begin: NaiveDateTime, end: NaiveDateTime) -> Self {
            Minimal(self.0.filter_range(field, begin, end))
        }

        fn filter_exact(&self, field: &str, year: i32, month: u32, day: u32) -> Self {
            Minimal(self.0.filter_exact(field, year, month, day))
        }

        fn filter_compare(&self, field: &str, op: Operator, value: NaiveDateTime) -> Self {
            Minimal(self.0.filter_compare(field, op, value))
        }

        fn aggregate(&self, field: &str, kind: Aggregate) -> SourceResult<f64> {
            self.0.aggregate(field, kind)
        }
    }

    #[test]
    fn test_source_without_engine_uses_per_bucket_queries() {
        let source = Minimal(MemorySource::new(sample_records()));
        assert_eq!(source.engine(), None);
        let stats = QueryStats::new(source, "created").with_clock(Clock::Fixed(at(0, 10)));
        let none = Overrides::new();

        let series = stats
            .time_series(midnight(-1), Some(midnight(3)), Interval::Day, &none)
            .unwrap();
        assert_eq!(values(&series), vec![0.0, 2.0, 3.0, 0.0]);

        // an explicit engine still fails inside the source and falls back
        let mysql = Overrides::new().engine("mysql");
        let series = stats
            .time_series(midnight(-1), Some(midnight(3)), Interval::Day, &mysql)
            .unwrap();
        assert_eq!(values(&series), vec![0.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_replacement_memory_strategy_keeps_calendar_grouping() {
        struct OddKeys;

        impl BucketStrategy for OddKeys {
            fn id(&self) -> &str {
                "memory"
            }

            fn expression(&self, interval: Interval, date_field: &str) -> Option<String> {
                Some(format!("odd({}, {})", date_field, interval))
            }

            fn bucket_key(&self, _interval: Interval, _instant: NaiveDateTime) -> Option<String> {
                Some("not-a-date".to_string())
            }
        }

        let mut engines = EngineRegistry::empty();
        engines.register(OddKeys);
        let source = Recording::new(sample_records());
        let stats = QueryStats::new(source.clone(), "created").with_engines(engines);

        let series = stats
            .time_series(midnight(0), Some(midnight(2)), Interval::Day, &Overrides::new())
            .unwrap();
        assert_eq!(values(&series), vec![2.0, 3.0]);
        // grouped natively, with no per-bucket queries
        assert_eq!(source.calls(), vec!["filter_range", "group_aggregate"]);
    }

    #[test]
    fn test_fast_and_slow_paths_agree() {
        let fast = sample_stats();
        let slow = sample_stats().with_engines(EngineRegistry::empty());
        let none = Overrides::new();

        for interval in [Interval::Minute, Interval::Hour, Interval::Day, Interval::Week, Interval::Month] {
            let start = at(-3, 0);
            let end = at(2, 0);
            let a = fast.time_series(start, Some(end), interval, &none).unwrap();
            let b = slow.time_series(start, Some(end), interval, &none).unwrap();
            assert_eq!(a, b, "paths disagree for {}", interval);
            assert_eq!(a.iter().map(|p| p.value).sum::<f64>(), 5.0);
        }
    }

    #[test]
    fn test_sqlite_fast_path_matches_memory_slow_path() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE events (id INTEGER PRIMARY KEY, created TEXT)", [])
            .unwrap();
        for (i, record) in sample_records().iter().enumerate() {
            let created = record.get("created").as_datetime().unwrap();
            conn.execute(
                "INSERT INTO events (id, created) VALUES (?1, ?2)",
                rusqlite::params![i as i64 + 1, crate::time::format_instant(&created)],
            )
            .unwrap();
        }

        let sqlite = QueryStats::new(SqliteSource::new(&conn, "events"), "created");
        let memory_slow = sample_stats().with_engines(EngineRegistry::empty());
        let none = Overrides::new();

        for interval in [Interval::Hour, Interval::Day, Interval::Week] {
            let a = sqlite
                .time_series(at(-2, 0), Some(at(4, 0)), interval, &none)
                .unwrap();
            let b = memory_slow
                .time_series(at(-2, 0), Some(at(4, 0)), interval, &none)
                .unwrap();
            assert_eq!(a, b, "sqlite disagrees for {}", interval);
        }
        assert_eq!(SqliteEngine.id(), sqlite.source().unwrap().engine().unwrap());
    }

    #[test]
    fn test_series_grid_is_gapless_and_increasing() {
        let stats = sample_stats();
        let series = stats
            .time_series(at(-40, 13), Some(at(40, 0)), Interval::Week, &Overrides::new())
            .unwrap();

        assert_eq!(series.first().unwrap().bucket, Interval::Week.truncate(at(-40, 13)));
        for pair in series.windows(2) {
            assert_eq!(pair[1].bucket, Interval::Week.step(pair[0].bucket));
        }
        assert!(series.last().unwrap().bucket < at(40, 0));
        assert_eq!(series.iter().filter(|p| p.value > 0.0).count(), 1);
    }

    #[test]
    fn test_series_defaults_end_to_tomorrow() {
        let stats = sample_stats();
        let series = stats
            .time_series(midnight(-2), None, Interval::Day, &Overrides::new())
            .unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.last().unwrap().bucket, midnight(0));
        assert_eq!(series.last().unwrap().value, 2.0);
    }

    #[test]
    fn test_empty_range_yields_empty_series() {
        let stats = sample_stats();
        let series = stats
            .time_series(midnight(3), Some(midnight(3)), Interval::Day, &Overrides::new())
            .unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn test_with_clock_refreshes_today() {
        let stats = sample_stats().with_clock(Clock::Fixed(at(1, 6)));
        assert_eq!(stats.today(), reference_day() + Duration::days(1));
        assert_eq!(stats.this_day(&Overrides::new()).unwrap(), 3.0);

        let mut stats = stats;
        stats.update_today();
        assert_eq!(stats.today(), reference_day() + Duration::days(1));
    }
}
