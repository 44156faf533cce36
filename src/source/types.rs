//! Aggregate kinds and pivot operators shared by all query sources

use crate::error::StatsError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// Aggregation functions a query source must support
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    /// Count of non-null values
    #[default]
    Count,
    /// Sum of values
    Sum,
    /// Average of values
    #[serde(alias = "average")]
    Avg,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
}

impl Aggregate {
    /// Apply the aggregation to a slice of values
    ///
    /// Returns `None` for an empty slice, except `Count` which is zero.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return match self {
                Self::Count => Some(0.0),
                _ => None,
            };
        }

        Some(match self {
            Self::Count => values.len() as f64,
            Self::Sum => values.iter().sum(),
            Self::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Self::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// SQL aggregate function name
    pub fn sql_function(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

impl FromStr for Aggregate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "avg" | "average" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(format!("unknown aggregate: {}", other)),
        }
    }
}

impl std::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_function())
    }
}

/// One-sided comparison operators allowed in pivot queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Strictly before
    #[serde(alias = "<")]
    Lt,
    /// On or before
    #[default]
    #[serde(alias = "<=")]
    Lte,
    /// Strictly after
    #[serde(alias = ">")]
    Gt,
    /// On or after
    #[serde(alias = ">=")]
    Gte,
}

impl Operator {
    /// Whether `value <op> pivot` holds
    pub fn matches<T: PartialOrd>(&self, value: &T, pivot: &T) -> bool {
        match value.partial_cmp(pivot) {
            Some(Ordering::Less) => matches!(self, Self::Lt | Self::Lte),
            Some(Ordering::Equal) => matches!(self, Self::Lte | Self::Gte),
            Some(Ordering::Greater) => matches!(self, Self::Gt | Self::Gte),
            None => false,
        }
    }

    /// SQL comparison symbol
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

impl FromStr for Operator {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lt" | "<" => Ok(Self::Lt),
            "lte" | "<=" | "≤" => Ok(Self::Lte),
            "gt" | ">" => Ok(Self::Gt),
            "gte" | ">=" | "≥" => Ok(Self::Gte),
            _ => Err(StatsError::InvalidOperator(s.to_string())),
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql())
    }
}
