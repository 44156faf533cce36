//! Bucket strategies for native grouped aggregation
//!
//! The fast time-series path asks the query source to group rows by a
//! backend-native truncation expression. The expression syntax differs per
//! backend, so each backend gets a [`BucketStrategy`] registered under its
//! identifier in an [`EngineRegistry`]:
//!
//! | engine       | day expression                          |
//! |--------------|-----------------------------------------|
//! | `mysql`      | `DATE_FORMAT(f, '%Y-%m-%d')`            |
//! | `sqlite`     | `strftime('%Y-%m-%d', "f")`             |
//! | `postgresql` | `to_char(date_trunc('day', "f"), ...)`  |
//! | `memory`     | evaluated in-process by `MemorySource`  |
//!
//! Every expression evaluates to a bucket key: the bucket start rendered as
//! `%Y-%m-%d %H:%M` (minute), `%Y-%m-%d %H:00` (hour) or `%Y-%m-%d`.

use crate::error::{StatsError, StatsResult};
use crate::interval::Interval;
use crate::time::parse_instant;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Per-backend bucket truncation
pub trait BucketStrategy: Send + Sync {
    /// Backend identifier this strategy is registered under
    fn id(&self) -> &str;

    /// Native expression yielding the bucket key of `date_field`,
    /// or `None` if the backend cannot truncate to `interval`
    fn expression(&self, interval: Interval, date_field: &str) -> Option<String>;

    /// Bucket key for `instant`, matching what [`expression`](Self::expression) computes
    fn bucket_key(&self, interval: Interval, instant: NaiveDateTime) -> Option<String> {
        Some(format_bucket_key(interval, interval.truncate(instant)))
    }
}

/// Render a bucket start as its key
pub fn format_bucket_key(interval: Interval, bucket: NaiveDateTime) -> String {
    let fmt = match interval {
        Interval::Minute => "%Y-%m-%d %H:%M",
        Interval::Hour => "%Y-%m-%d %H:00",
        _ => "%Y-%m-%d",
    };
    bucket.format(fmt).to_string()
}

/// Parse a bucket key back into the bucket start
pub fn parse_bucket_key(key: &str) -> Option<NaiveDateTime> {
    parse_instant(key)
}

/// Everything a source needs to run a native grouped aggregation
///
/// Sources evaluate `expression` in their own backend. `MemorySource` has no
/// expression language and always groups with [`MemoryEngine`]'s keys, so a
/// strategy registered under `memory` only decides which intervals are
/// allowed, not how records are grouped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    /// Backend identifier the expression was written for
    pub engine: String,
    pub interval: Interval,
    pub date_field: String,
    /// Backend-native expression computing the bucket key
    pub expression: String,
}

fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// MySQL / MariaDB
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlEngine;

impl BucketStrategy for MySqlEngine {
    fn id(&self) -> &str {
        "mysql"
    }

    fn expression(&self, interval: Interval, date_field: &str) -> Option<String> {
        let f = quote_backtick(date_field);
        Some(match interval {
            Interval::Minute => format!("DATE_FORMAT({f}, '%Y-%m-%d %H:%i')"),
            Interval::Hour => format!("DATE_FORMAT({f}, '%Y-%m-%d %H:00')"),
            Interval::Day => format!("DATE_FORMAT({f}, '%Y-%m-%d')"),
            Interval::Week => {
                format!("DATE_FORMAT(DATE_SUB({f}, INTERVAL(WEEKDAY({f})) DAY), '%Y-%m-%d')")
            }
            Interval::Month => format!("DATE_FORMAT({f}, '%Y-%m-01')"),
            Interval::Year => format!("DATE_FORMAT({f}, '%Y-01-01')"),
        })
    }
}

/// SQLite, with dates stored as ISO-8601 text
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteEngine;

impl BucketStrategy for SqliteEngine {
    fn id(&self) -> &str {
        "sqlite"
    }

    fn expression(&self, interval: Interval, date_field: &str) -> Option<String> {
        let f = quote_double(date_field);
        Some(match interval {
            Interval::Minute => format!("strftime('%Y-%m-%d %H:%M', {f})"),
            Interval::Hour => format!("strftime('%Y-%m-%d %H:00', {f})"),
            Interval::Day => format!("strftime('%Y-%m-%d', {f})"),
            // next Sunday on or after, then back to its Monday
            Interval::Week => format!("strftime('%Y-%m-%d', {f}, 'weekday 0', '-6 days')"),
            Interval::Month => format!("strftime('%Y-%m-01', {f})"),
            Interval::Year => format!("strftime('%Y-01-01', {f})"),
        })
    }
}

/// PostgreSQL
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresEngine;

impl BucketStrategy for PostgresEngine {
    fn id(&self) -> &str {
        "postgresql"
    }

    fn expression(&self, interval: Interval, date_field: &str) -> Option<String> {
        let f = quote_double(date_field);
        let pattern = match interval {
            Interval::Minute => "YYYY-MM-DD HH24:MI",
            Interval::Hour => "YYYY-MM-DD HH24:00",
            _ => "YYYY-MM-DD",
        };
        // date_trunc('week', ..) is ISO, so Monday-start
        Some(format!(
            "to_char(date_trunc('{}', {f}), '{}')",
            interval.name(),
            pattern
        ))
    }
}

/// In-process grouping performed by [`MemorySource`](crate::source::MemorySource)
///
/// The expression is informational; `MemorySource` buckets with
/// [`BucketStrategy::bucket_key`] of this type regardless of which strategy
/// the registry holds under `memory`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryEngine;

impl BucketStrategy for MemoryEngine {
    fn id(&self) -> &str {
        "memory"
    }

    fn expression(&self, interval: Interval, date_field: &str) -> Option<String> {
        Some(format!("truncate({}, {})", date_field, interval))
    }
}

/// Bucket strategies keyed by backend identifier
pub struct EngineRegistry {
    strategies: BTreeMap<String, Box<dyn BucketStrategy>>,
}

impl EngineRegistry {
    /// A registry with no strategies; every fast path falls back
    pub fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// The built-in mysql, sqlite, postgresql and memory strategies
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(MySqlEngine);
        registry.register(SqliteEngine);
        registry.register(PostgresEngine);
        registry.register(MemoryEngine);
        registry
    }

    /// Add or replace the strategy for its identifier
    pub fn register<B: BucketStrategy + 'static>(&mut self, strategy: B) {
        self.strategies
            .insert(strategy.id().to_string(), Box::new(strategy));
    }

    /// Look up a strategy, failing with [`StatsError::UnsupportedEngine`]
    pub fn get(&self, id: &str) -> StatsResult<&dyn BucketStrategy> {
        self.strategies
            .get(id)
            .map(|s| &**s)
            .ok_or_else(|| StatsError::UnsupportedEngine(id.to_string()))
    }

    /// Registered identifiers, sorted
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}
