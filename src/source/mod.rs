//! Query Sources
//!
//! The stats facade never touches records directly. It narrows a
//! [`QuerySource`] with filters and asks it to aggregate:
//!
//! ```text
//! for_week(t):   source.filter_range(date, mon, mon + 7d).aggregate(id, COUNT)
//! for_day(t):    source.filter_exact(date, y, m, d).aggregate(id, COUNT)
//! until(t):      source.filter_compare(date, <=, t).aggregate(id, COUNT)
//! time_series:   source.filter_range(date, first, last + 1).group_aggregate(trunc, id, COUNT)
//! ```
//!
//! Two adapters ship with the crate:
//!
//! - **MemorySource**: shared in-memory records, loadable from CSV
//! - **SqliteSource**: one table of a borrowed `rusqlite::Connection`

mod error;
mod memory;
mod sqlite;
mod types;

pub use error::{SourceError, SourceResult};
pub use memory::{FieldValue, MemorySource, Record};
pub use sqlite::SqliteSource;
pub use types::{Aggregate, Operator};

use crate::engine::Truncation;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// A filterable, aggregatable collection of date-stamped records
///
/// Filters are lazy and compose: each returns a narrowed copy of the source
/// and nothing is evaluated until an aggregate is requested.
pub trait QuerySource: Sized {
    /// Keep records with `begin <= field < end`
    fn filter_range(&self, field: &str, begin: NaiveDateTime, end: NaiveDateTime) -> Self;

    /// Keep records whose `field` falls on the calendar date `year-month-day`
    fn filter_exact(&self, field: &str, year: i32, month: u32, day: u32) -> Self;

    /// Keep records with `field <op> value`
    fn filter_compare(&self, field: &str, op: Operator, value: NaiveDateTime) -> Self;

    /// Aggregate `field` over the remaining records
    ///
    /// Aggregating no rows yields zero.
    fn aggregate(&self, field: &str, kind: Aggregate) -> SourceResult<f64>;

    /// Aggregate `field` per bucket key computed by `truncation`
    ///
    /// Only non-empty buckets are returned. Sources without native grouping
    /// keep the default, which reports the capability as unsupported.
    fn group_aggregate(
        &self,
        truncation: &Truncation,
        field: &str,
        kind: Aggregate,
    ) -> SourceResult<BTreeMap<String, f64>> {
        let _ = (field, kind);
        Err(SourceError::Unsupported(format!(
            "native grouping ({})",
            truncation.engine
        )))
    }

    /// Backend identifier used when no engine is configured
    fn engine(&self) -> Option<&str> {
        None
    }
}
