//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `QSTATS_*` environment variable overrides.

use crate::source::{Aggregate, Operator};
use crate::stats::Clock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults applied by a `QueryStats` instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Datetime field the intervals are computed over
    #[serde(default)]
    pub date_field: Option<String>,

    #[serde(default = "default_aggregate_field")]
    pub aggregate_field: String,

    #[serde(default)]
    pub aggregate: Aggregate,

    /// Default operator for pivots
    #[serde(default)]
    pub operator: Operator,

    /// Backend identifier for native grouping; the source's own when unset
    #[serde(default)]
    pub engine: Option<String>,

    #[serde(default)]
    pub clock: Clock,
}

fn default_aggregate_field() -> String {
    "id".to_string()
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            date_field: None,
            aggregate_field: default_aggregate_field(),
            aggregate: Aggregate::default(),
            operator: Operator::default(),
            engine: None,
            clock: Clock::default(),
        }
    }
}

/// Where the CLI reads records from
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// SQLite database file
    pub db: Option<PathBuf>,

    #[serde(default = "default_table")]
    pub table: String,

    /// CSV file, used when no database is set
    pub csv: Option<PathBuf>,

    /// CSV columns parsed as datetimes; the stats date field is always included
    #[serde(default)]
    pub date_fields: Vec<String>,
}

fn default_table() -> String {
    "records".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            db: None,
            table: default_table(),
            csv: None,
            date_fields: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("qstats").join("config.toml")),
            Some(PathBuf::from("/etc/qstats/config.toml")),
            Some(PathBuf::from("./qstats.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Stats overrides
        if let Some(field) = var("QSTATS_DATE_FIELD") {
            self.stats.date_field = Some(field);
        }
        if let Some(field) = var("QSTATS_AGGREGATE_FIELD") {
            self.stats.aggregate_field = field;
        }
        if let Some(aggregate) = var("QSTATS_AGGREGATE") {
            match aggregate.parse() {
                Ok(a) => self.stats.aggregate = a,
                Err(e) => tracing::warn!("Ignoring QSTATS_AGGREGATE: {}", e),
            }
        }
        if let Some(operator) = var("QSTATS_OPERATOR") {
            match operator.parse() {
                Ok(op) => self.stats.operator = op,
                Err(e) => tracing::warn!("Ignoring QSTATS_OPERATOR: {}", e),
            }
        }
        if let Some(engine) = var("QSTATS_ENGINE") {
            self.stats.engine = Some(engine);
        }

        // Source overrides
        if let Some(db) = var("QSTATS_DB") {
            self.source.db = Some(PathBuf::from(db));
        }
        if let Some(table) = var("QSTATS_TABLE") {
            self.source.table = table;
        }

        // Logging overrides
        if let Some(level) = var("QSTATS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("QSTATS_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# qstats Configuration
#
# Environment variables override these settings:
# - QSTATS_DATE_FIELD
# - QSTATS_AGGREGATE_FIELD
# - QSTATS_AGGREGATE
# - QSTATS_OPERATOR
# - QSTATS_ENGINE
# - QSTATS_DB
# - QSTATS_TABLE
# - QSTATS_LOG_LEVEL
# - QSTATS_LOG_FORMAT

[stats]
# Datetime field intervals are computed over
# date_field = "created_at"

# Field passed to the aggregate
aggregate_field = "id"

# Aggregate: count, sum, avg, min, max
aggregate = "count"

# Default pivot operator: lt, lte, gt, gte
operator = "lte"

# Backend for native grouping: mysql, sqlite, postgresql, memory
# engine = "sqlite"

# Where "today" comes from: utc or local
clock = "local"

[source]
# SQLite database file and table
# db = "./data.db"
table = "records"

# CSV file with a header row, used when no database is set
# csv = "./records.csv"

# Extra CSV columns to parse as datetimes
date_fields = []

[logging]
# Log level: trace, debug, info, warn, error
level = "warn"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/qstats/qstats.log"
"#
    .to_string()
}
