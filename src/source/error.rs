//! Query source error types
//!
//! Defines the failures a query source adapter can report back to the
//! stats facade.

use thiserror::Error;

/// Errors that can occur inside a query source
#[derive(Error, Debug)]
pub enum SourceError {
    /// SQLite statement preparation or execution failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// CSV input could not be read
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Native grouping was requested for a backend this source is not
    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// The source does not implement the requested capability
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A native grouping returned a bucket key that is not an instant
    #[error("Bad bucket key: {0}")]
    BadBucketKey(String),

    /// A record could not be decoded
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Result type for query source operations
pub type SourceResult<T> = Result<T, SourceError>;
