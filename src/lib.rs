//! # qstats
//!
//! Calendar-bucketed aggregate statistics over a query source: "how many
//! signups today", "revenue per week since March", "orders up to now".
//!
//! ## Features
//!
//! - **Interval bounds**: minute, hour, day, week (Monday start), month and year
//! - **Snapshots**: aggregate for the bucket containing an instant or today
//! - **Pivots**: cumulative aggregates before or after an instant
//! - **Time series**: native grouped aggregation with a per-bucket fallback
//!
//! ## Modules
//!
//! - [`interval`]: Interval boundary calculator
//! - [`stats`]: The `QueryStats` facade
//! - [`engine`]: Per-backend bucket truncation strategies
//! - [`source`]: The query source contract plus in-memory and SQLite adapters
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use qstats::{Interval, Overrides, QueryStats, SqliteSource};
//! use rusqlite::Connection;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = Connection::open("app.db")?;
//!     let stats = QueryStats::new(SqliteSource::new(&conn, "users"), "created_at");
//!     let none = Overrides::new();
//!
//!     println!("signups today: {}", stats.this_day(&none)?);
//!     println!("signups so far: {}", stats.until_now(&none)?);
//!
//!     let start = stats.today() - chrono::Duration::days(30);
//!     for point in stats.time_series(start, None, Interval::Week, &none)? {
//!         println!("{}  {}", point.bucket.date(), point.value);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod interval;
pub mod source;
pub mod stats;
pub mod time;

// Re-export top-level types for convenience
pub use config::{generate_default_config, Config, ConfigError, LoggingConfig, SourceConfig, StatsConfig};

pub use engine::{
    BucketStrategy, EngineRegistry, MemoryEngine, MySqlEngine, PostgresEngine, SqliteEngine,
    Truncation,
};

pub use error::{StatsError, StatsResult};

pub use interval::{get_bounds, Bounds, Interval};

pub use source::{
    Aggregate, FieldValue, MemorySource, Operator, QuerySource, Record, SourceError, SourceResult,
    SqliteSource,
};

pub use stats::{Clock, Overrides, QueryStats, SeriesPoint};

pub use time::{parse_instant, ToInstant};
