//! Stats error types
//!
//! Defines every error condition the boundary calculator and the stats
//! facade can surface to a caller.

use crate::source::SourceError;
use thiserror::Error;

/// Errors that can occur while computing bounds or aggregating statistics
#[derive(Error, Debug)]
pub enum StatsError {
    /// Interval name or kind is not supported here
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// Pivot comparison operator is not one of <, <=, >, >=
    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    /// No date field was configured or passed for the call
    #[error("Date field missing: configure a date_field or pass one per call")]
    DateFieldMissing,

    /// No query source was configured
    #[error("Query source missing: configure a source before aggregating")]
    QuerySetMissing,

    /// No bucket strategy is registered for the backend
    #[error("Unsupported engine: {0}")]
    UnsupportedEngine(String),

    /// The query source failed
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

/// Result type for stats operations
pub type StatsResult<T> = Result<T, StatsError>;
