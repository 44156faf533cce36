//! qstats CLI
//!
//! Command-line interface for interval statistics:
//! - Print interval bounds
//! - Snapshot an interval or today
//! - Cumulative pivots before or after an instant
//! - Time series over a range

use anyhow::{bail, Context};
use chrono::{Duration, NaiveDateTime};
use clap::{Parser, Subcommand};
use qstats::{
    generate_default_config, get_bounds, parse_instant, Config, Interval, LoggingConfig,
    MemorySource, Operator, Overrides, QuerySource, QueryStats, SeriesPoint, SqliteSource,
    StatsResult, ToInstant,
};
use rusqlite::Connection;
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "qstats")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Calendar-bucketed aggregate statistics over CSV files and SQLite tables")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Read records from a CSV file
    #[arg(long, global = true, conflicts_with = "db")]
    pub csv: Option<PathBuf>,

    /// Read records from a SQLite database
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// SQLite table
    #[arg(long, global = true)]
    pub table: Option<String>,

    /// Datetime field to bucket on
    #[arg(short = 'd', long, global = true)]
    pub date_field: Option<String>,

    /// Field passed to the aggregate
    #[arg(short = 'f', long, global = true)]
    pub aggregate_field: Option<String>,

    /// Aggregate (count, sum, avg, min, max)
    #[arg(short, long, global = true)]
    pub aggregate: Option<String>,

    /// Backend used for native grouping (mysql, sqlite, postgresql, memory)
    #[arg(long, global = true)]
    pub engine: Option<String>,

    /// Output format (table, json)
    #[arg(long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the bounds of the interval containing an instant
    Bounds {
        /// minute, hour, day, week, month, year
        interval: String,
        /// Instant (default: now). Supports "now", "today", "yesterday", ISO 8601
        at: Option<String>,
    },

    /// Aggregate for the interval containing an instant
    For {
        interval: String,
        at: String,
    },

    /// Aggregate for the interval containing today
    This {
        interval: String,
    },

    /// Cumulative aggregate up to and including an instant
    Until {
        /// Instant (default: now)
        at: Option<String>,
    },

    /// Cumulative aggregate from an instant onwards
    After {
        /// Instant (default: now)
        at: Option<String>,
    },

    /// Aggregate over records compared against an instant
    Pivot {
        at: String,
        /// lt, lte, gt, gte (or <, <=, >, >=); default: the configured operator
        #[arg(short, long)]
        operator: Option<String>,
    },

    /// One aggregate per interval bucket
    Series {
        interval: String,
        /// First instant covered
        start: String,
        /// End of the range, exclusive (default: tomorrow)
        #[arg(short, long)]
        end: Option<String>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    apply_cli_overrides(&mut config, &cli)?;
    init_tracing(&config.logging)?;

    tracing::debug!("qstats v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    println!("Wrote default config to {:?}", path);
                }
                None => print!("{}", content),
            }
            Ok(())
        }

        Commands::Bounds { interval, at } => {
            let clock = config.stats.clock;
            let at = parse_at(at.as_deref().unwrap_or("now"), clock.now())?;
            let bounds = get_bounds(at, &interval)?;
            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&bounds)?),
                _ => {
                    println!("begin: {}", bounds.begin);
                    println!("end:   {}", bounds.end);
                }
            }
            Ok(())
        }

        command => {
            if let Some(path) = config.source.db.clone() {
                let conn = Connection::open(&path)
                    .with_context(|| format!("Failed to open database {:?}", path))?;
                tracing::info!("Reading table {} from {:?}", config.source.table, path);
                let source = SqliteSource::new(&conn, config.source.table.clone());
                run(
                    QueryStats::from_config(Some(source), config.stats),
                    command,
                    &cli.format,
                )
            } else if let Some(path) = config.source.csv.clone() {
                let mut date_fields: Vec<&str> =
                    config.source.date_fields.iter().map(String::as_str).collect();
                date_fields.extend(config.stats.date_field.as_deref());
                let source = MemorySource::from_csv_path(&path, &date_fields)
                    .with_context(|| format!("Failed to load {:?}", path))?;
                tracing::info!("Loaded {} records from {:?}", source.total(), path);
                run(
                    QueryStats::from_config(Some(source), config.stats),
                    command,
                    &cli.format,
                )
            } else {
                run(
                    QueryStats::<MemorySource>::from_config(None, config.stats),
                    command,
                    &cli.format,
                )
            }
        }
    }
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) -> anyhow::Result<()> {
    if let Some(csv) = &cli.csv {
        config.source.csv = Some(csv.clone());
        config.source.db = None;
    }
    if let Some(db) = &cli.db {
        config.source.db = Some(db.clone());
    }
    if let Some(table) = &cli.table {
        config.source.table = table.clone();
    }
    if let Some(field) = &cli.date_field {
        config.stats.date_field = Some(field.clone());
    }
    if let Some(field) = &cli.aggregate_field {
        config.stats.aggregate_field = field.clone();
    }
    if let Some(aggregate) = &cli.aggregate {
        config.stats.aggregate = aggregate.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(engine) = &cli.engine {
        config.stats.engine = Some(engine.clone());
    }
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("qstats={}", logging.level).into());

    let writer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init();
    }
    Ok(())
}

/// Parse an instant argument relative to `now`
fn parse_at(s: &str, now: NaiveDateTime) -> anyhow::Result<NaiveDateTime> {
    match s {
        "now" => Ok(now),
        "today" => Ok(now.date().to_instant()),
        "yesterday" => Ok((now.date() - Duration::days(1)).to_instant()),
        _ => match parse_instant(s) {
            Some(dt) => Ok(dt),
            None => bail!("Invalid instant: {} (expected now, today, yesterday or ISO 8601)", s),
        },
    }
}

fn run<S: QuerySource>(stats: QueryStats<S>, command: Commands, format: &str) -> anyhow::Result<()> {
    let none = Overrides::new();
    let now = stats.now();

    let (label, value) = match command {
        Commands::For { interval, at } => {
            let interval: Interval = interval.parse()?;
            let at = parse_at(&at, now)?;
            (format!("{} of {}", interval, at), stats.for_interval(interval, at, &none)?)
        }
        Commands::This { interval } => {
            let interval: Interval = interval.parse()?;
            (format!("this {}", interval), stats.this_interval(interval, &none)?)
        }
        Commands::Until { at } => {
            let at = parse_at(at.as_deref().unwrap_or("now"), now)?;
            (format!("until {}", at), stats.until(at, &none)?)
        }
        Commands::After { at } => {
            let at = parse_at(at.as_deref().unwrap_or("now"), now)?;
            (format!("after {}", at), stats.after(at, &none)?)
        }
        Commands::Pivot { at, operator } => {
            let at = parse_at(&at, now)?;
            let (op, value) = pivot(&stats, at, operator.as_deref(), &none)?;
            (format!("{} {}", op, at), value)
        }
        Commands::Series { interval, start, end } => {
            let interval: Interval = interval.parse()?;
            let start = parse_at(&start, now)?;
            let end = end.as_deref().map(|e| parse_at(e, now)).transpose()?;
            let series = stats.time_series(start, end, interval, &none)?;
            print_series(&series, format)?;
            return Ok(());
        }
        Commands::Bounds { .. } | Commands::Config { .. } => {
            bail!("command does not read a source")
        }
    };

    match format {
        "json" => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "query": label,
                "value": value,
            }))?
        ),
        _ => println!("{:<40} {}", label, value),
    }
    Ok(())
}

/// Pivot with the given operator, or the configured one when absent
fn pivot<S: QuerySource>(
    stats: &QueryStats<S>,
    at: NaiveDateTime,
    operator: Option<&str>,
    opts: &Overrides,
) -> StatsResult<(Operator, f64)> {
    let op = match operator {
        Some(op) => op.parse()?,
        None => stats.config().operator,
    };
    Ok((op, stats.pivot(at, Some(op), opts)?))
}

fn print_series(series: &[SeriesPoint], format: &str) -> anyhow::Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(series)?),
        _ => {
            println!("{:<20} {}", "Bucket", "Value");
            println!("{}", "-".repeat(32));
            for point in series {
                println!("{:<20} {}", point.bucket.format("%Y-%m-%d %H:%M").to_string(), point.value);
            }
            let total: f64 = series.iter().map(|p| p.value).sum();
            println!("{}", "-".repeat(32));
            println!("{:<20} {}", "Total", total);
        }
    }
    Ok(())
}
