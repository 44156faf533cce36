//! In-memory query source
//!
//! Records are shared behind an `Arc` so narrowing a source only clones its
//! predicate list. Aggregates follow SQL semantics: `COUNT(field)` counts
//! non-null values, the others run over numeric values only.

use super::{Aggregate, Operator, QuerySource, SourceError, SourceResult};
use crate::engine::{BucketStrategy, MemoryEngine, Truncation};
use crate::time::parse_instant;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    DateTime(NaiveDateTime),
    Number(f64),
    Text(String),
    Null,
}

impl FieldValue {
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

static NULL: FieldValue = FieldValue::Null;

/// A record: field name → value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set a field
    pub fn field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Builder method: set a datetime field
    pub fn datetime(self, name: impl Into<String>, value: NaiveDateTime) -> Self {
        self.field(name, FieldValue::DateTime(value))
    }

    /// Builder method: set a numeric field
    pub fn number(self, name: impl Into<String>, value: f64) -> Self {
        self.field(name, FieldValue::Number(value))
    }

    /// Builder method: set a text field
    pub fn text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.field(name, FieldValue::Text(value.into()))
    }

    /// Get a field value; absent fields read as null
    pub fn get(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&NULL)
    }
}

#[derive(Debug, Clone)]
enum Predicate {
    Range {
        field: String,
        begin: NaiveDateTime,
        end: NaiveDateTime,
    },
    /// `None` for an impossible calendar date, which matches nothing
    Exact { field: String, date: Option<NaiveDate> },
    Compare {
        field: String,
        op: Operator,
        value: NaiveDateTime,
    },
}

impl Predicate {
    fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Range { field, begin, end } => record
                .get(field)
                .as_datetime()
                .is_some_and(|dt| *begin <= dt && dt < *end),
            Self::Exact { field, date } => match (record.get(field).as_datetime(), date) {
                (Some(dt), Some(date)) => dt.date() == *date,
                _ => false,
            },
            Self::Compare { field, op, value } => record
                .get(field)
                .as_datetime()
                .is_some_and(|dt| op.matches(&dt, value)),
        }
    }
}

/// Values collected for one aggregate
#[derive(Debug, Default)]
struct Accumulator {
    non_null: usize,
    numbers: Vec<f64>,
}

impl Accumulator {
    fn push(&mut self, value: &FieldValue) {
        if !value.is_null() {
            self.non_null += 1;
        }
        if let Some(n) = value.as_number() {
            self.numbers.push(n);
        }
    }

    fn finish(&self, kind: Aggregate) -> f64 {
        match kind {
            Aggregate::Count => self.non_null as f64,
            _ => kind.apply(&self.numbers).unwrap_or(0.0),
        }
    }
}

/// Query source over shared in-memory records
#[derive(Debug, Clone)]
pub struct MemorySource {
    records: Arc<[Record]>,
    predicates: Vec<Predicate>,
}

impl MemorySource {
    /// Create a source over `records` with no filters applied
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into(),
            predicates: Vec::new(),
        }
    }

    /// Load records from CSV with a header row
    ///
    /// Columns listed in `date_fields` are parsed as instants; other cells
    /// become numbers when numeric, text otherwise. Empty cells are null.
    pub fn from_csv<R: Read>(reader: R, date_fields: &[&str]) -> SourceResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        Self::read_csv(&mut reader, date_fields)
    }

    /// Load records from a CSV file, see [`from_csv`](Self::from_csv)
    pub fn from_csv_path(path: &Path, date_fields: &[&str]) -> SourceResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        Self::read_csv(&mut reader, date_fields)
    }

    fn read_csv<R: Read>(reader: &mut csv::Reader<R>, date_fields: &[&str]) -> SourceResult<Self> {
        let headers = reader.headers()?.clone();
        let mut records = Vec::new();

        for (line_num, row) in reader.records().enumerate() {
            let row = row?;
            let mut record = Record::new();

            for (header, cell) in headers.iter().zip(row.iter()) {
                let cell = cell.trim();
                let value = if cell.is_empty() {
                    FieldValue::Null
                } else if date_fields.contains(&header) {
                    let dt = parse_instant(cell).ok_or_else(|| {
                        SourceError::InvalidRecord(format!(
                            "line {}: could not parse {} as a datetime: {}",
                            line_num + 2,
                            header,
                            cell
                        ))
                    })?;
                    FieldValue::DateTime(dt)
                } else if let Ok(n) = cell.parse::<f64>() {
                    FieldValue::Number(n)
                } else {
                    FieldValue::Text(cell.to_string())
                };
                record = record.field(header, value);
            }

            records.push(record);
        }

        tracing::debug!(records = records.len(), "Loaded CSV records");
        Ok(Self::new(records))
    }

    /// Total number of records, ignoring filters
    pub fn total(&self) -> usize {
        self.records.len()
    }

    /// Records passing every filter
    pub fn matching(&self) -> impl Iterator<Item = &Record> {
        self.records
            .iter()
            .filter(move |r| self.predicates.iter().all(|p| p.matches(r)))
    }

    fn with(&self, predicate: Predicate) -> Self {
        let mut narrowed = self.clone();
        narrowed.predicates.push(predicate);
        narrowed
    }
}

impl QuerySource for MemorySource {
    fn filter_range(&self, field: &str, begin: NaiveDateTime, end: NaiveDateTime) -> Self {
        self.with(Predicate::Range {
            field: field.to_string(),
            begin,
            end,
        })
    }

    fn filter_exact(&self, field: &str, year: i32, month: u32, day: u32) -> Self {
        self.with(Predicate::Exact {
            field: field.to_string(),
            date: NaiveDate::from_ymd_opt(year, month, day),
        })
    }

    fn filter_compare(&self, field: &str, op: Operator, value: NaiveDateTime) -> Self {
        self.with(Predicate::Compare {
            field: field.to_string(),
            op,
            value,
        })
    }

    fn aggregate(&self, field: &str, kind: Aggregate) -> SourceResult<f64> {
        let mut acc = Accumulator::default();
        for record in self.matching() {
            acc.push(record.get(field));
        }
        Ok(acc.finish(kind))
    }

    fn group_aggregate(
        &self,
        truncation: &Truncation,
        field: &str,
        kind: Aggregate,
    ) -> SourceResult<BTreeMap<String, f64>> {
        // registry overrides for "memory" cannot change the keys used here
        let strategy = MemoryEngine;
        if truncation.engine != strategy.id() {
            return Err(SourceError::UnsupportedBackend(truncation.engine.clone()));
        }

        let mut groups: BTreeMap<String, Accumulator> = BTreeMap::new();
        for record in self.matching() {
            let Some(dt) = record.get(&truncation.date_field).as_datetime() else {
                continue;
            };
            if let Some(key) = strategy.bucket_key(truncation.interval, dt) {
                groups.entry(key).or_default().push(record.get(field));
            }
        }

        Ok(groups
            .into_iter()
            .map(|(key, acc)| (key, acc.finish(kind)))
            .collect())
    }

    fn engine(&self) -> Option<&str> {
        Some("memory")
    }
}
