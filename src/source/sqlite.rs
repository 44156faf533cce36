//! SQLite query source
//!
//! Wraps one table of a borrowed `rusqlite::Connection`. Filters accumulate
//! as parameterised `WHERE` clauses; each aggregate runs a single statement.
//!
//! Date columns must hold ISO-8601 text that SQLite's date functions
//! understand (`YYYY-MM-DD HH:MM:SS` or the `T`-separated form). Range and
//! comparison filters normalise the column with `strftime` first, so both
//! forms land in the same buckets as `date()` and the grouped expressions.

use super::{Aggregate, Operator, QuerySource, SourceError, SourceResult};
use crate::engine::Truncation;
use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::BTreeMap;

/// Quote an SQL identifier, doubling embedded quotes
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Column value as `YYYY-MM-DD HH:MM:SS.SSS`, NULL when unparseable
fn normalized(field: &str) -> String {
    format!("strftime('%Y-%m-%d %H:%M:%f', {})", quote_ident(field))
}

/// Instant parameter in the same shape as [`normalized`]
fn instant_param(dt: &NaiveDateTime) -> Value {
    Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
}

/// Query source over a single SQLite table
#[derive(Debug, Clone)]
pub struct SqliteSource<'c> {
    conn: &'c Connection,
    table: String,
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl<'c> SqliteSource<'c> {
    /// Create a source over `table` with no filters applied
    pub fn new(conn: &'c Connection, table: impl Into<String>) -> Self {
        Self {
            conn,
            table: table.into(),
            clauses: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn with(&self, clause: String, params: impl IntoIterator<Item = Value>) -> Self {
        let mut narrowed = self.clone();
        narrowed.clauses.push(clause);
        narrowed.params.extend(params);
        narrowed
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

impl QuerySource for SqliteSource<'_> {
    fn filter_range(&self, field: &str, begin: NaiveDateTime, end: NaiveDateTime) -> Self {
        let f = normalized(field);
        self.with(
            format!("{f} >= ? AND {f} < ?"),
            [instant_param(&begin), instant_param(&end)],
        )
    }

    fn filter_exact(&self, field: &str, year: i32, month: u32, day: u32) -> Self {
        self.with(
            format!("date({}) = ?", quote_ident(field)),
            [Value::Text(format!("{:04}-{:02}-{:02}", year, month, day))],
        )
    }

    fn filter_compare(&self, field: &str, op: Operator, value: NaiveDateTime) -> Self {
        self.with(
            format!("{} {} ?", normalized(field), op.sql()),
            [instant_param(&value)],
        )
    }

    fn aggregate(&self, field: &str, kind: Aggregate) -> SourceResult<f64> {
        let sql = format!(
            "SELECT {}({}) FROM {}{}",
            kind.sql_function(),
            quote_ident(field),
            quote_ident(&self.table),
            self.where_sql()
        );
        tracing::debug!(sql = %sql, params = self.params.len(), "sqlite aggregate");

        let value: Option<f64> =
            self.conn
                .query_row(&sql, params_from_iter(self.params.iter()), |row| row.get(0))?;
        Ok(value.unwrap_or(0.0))
    }

    fn group_aggregate(
        &self,
        truncation: &Truncation,
        field: &str,
        kind: Aggregate,
    ) -> SourceResult<BTreeMap<String, f64>> {
        if truncation.engine != "sqlite" {
            return Err(SourceError::UnsupportedBackend(truncation.engine.clone()));
        }

        let sql = format!(
            "SELECT {}, {}({}) FROM {}{} GROUP BY 1",
            truncation.expression,
            kind.sql_function(),
            quote_ident(field),
            quote_ident(&self.table),
            self.where_sql()
        );
        tracing::debug!(sql = %sql, params = self.params.len(), "sqlite group aggregate");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(self.params.iter()), |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<f64>>(1)?))
        })?;

        let mut groups = BTreeMap::new();
        for row in rows {
            if let (Some(bucket), value) = row? {
                groups.insert(bucket, value.unwrap_or(0.0));
            }
        }
        Ok(groups)
    }

    fn engine(&self) -> Option<&str> {
        Some("sqlite")
    }
}
