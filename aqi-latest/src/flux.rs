//! Flux query construction.
//!
//! Configuration values never reach the query text unchecked: string
//! literals are escaped and the range start is validated up front, so a
//! built [`FluxQuery`] always renders to a well-formed pipeline.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Row cap applied after pivoting.
pub const MAX_ROWS: usize = 100;

/// Measurement holding the air-quality telemetry.
pub const MEASUREMENT: &str = "data";

/// Fields returned by `/latest`, in output order.
pub const AQI_FIELDS: [&str; 3] = ["Latitude", "Longitude", "AQI"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryBuildError {
    #[error("bucket name must not be empty")]
    EmptyBucket,
    #[error("invalid range start '{0}': expected an integer, a duration like -1h, or an RFC3339 timestamp")]
    InvalidRangeStart(String),
}

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^-?(\d+(ns|us|µs|ms|mo|s|m|h|d|w|y))+$").expect("valid duration regex")
    })
}

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d{1,9})?(Z|[+-]\d{2}:\d{2})$")
            .expect("valid timestamp regex")
    })
}

fn integer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+$").expect("valid integer regex"))
}

/// A validated `range(start: ...)` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeStart {
    /// Unix seconds; `0` means since the epoch.
    Unix(i64),
    Duration(String),
    Timestamp(String),
}

impl RangeStart {
    pub fn parse(raw: &str) -> Result<Self, QueryBuildError> {
        let s = raw.trim();
        if integer_re().is_match(s) {
            return s
                .parse::<i64>()
                .map(RangeStart::Unix)
                .map_err(|_| QueryBuildError::InvalidRangeStart(raw.to_string()));
        }
        if duration_re().is_match(s) {
            return Ok(RangeStart::Duration(s.to_string()));
        }
        if timestamp_re().is_match(s) {
            return Ok(RangeStart::Timestamp(s.to_string()));
        }
        Err(QueryBuildError::InvalidRangeStart(raw.to_string()))
    }
}

impl fmt::Display for RangeStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeStart::Unix(secs) => write!(f, "{}", secs),
            RangeStart::Duration(d) => f.write_str(d),
            RangeStart::Timestamp(t) => f.write_str(t),
        }
    }
}

/// Renders `value` as a double-quoted Flux string literal.
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Range(RangeStart),
    FilterEq { column: String, value: String },
    FilterAny { column: String, values: Vec<String> },
    Pivot { row_key: String, column_key: String, value_column: String },
    Limit(usize),
}

// Column names are identifiers chosen in code, not configuration.
impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Range(start) => write!(f, "range(start: {})", start),
            Stage::FilterEq { column, value } => write!(
                f,
                "filter(fn: (r) => r.{} == {})",
                column,
                string_literal(value)
            ),
            Stage::FilterAny { column, values } => {
                let predicate = values
                    .iter()
                    .map(|v| format!("r.{} == {}", column, string_literal(v)))
                    .collect::<Vec<_>>()
                    .join(" or ");
                write!(f, "filter(fn: (r) => {})", predicate)
            }
            Stage::Pivot {
                row_key,
                column_key,
                value_column,
            } => write!(
                f,
                "pivot(rowKey: [{}], columnKey: [{}], valueColumn: {})",
                string_literal(row_key),
                string_literal(column_key),
                string_literal(value_column)
            ),
            Stage::Limit(n) => write!(f, "limit(n: {})", n),
        }
    }
}

/// A Flux pipeline starting at `from(bucket: ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxQuery {
    bucket: String,
    stages: Vec<Stage>,
}

impl FluxQuery {
    pub fn from_bucket(bucket: impl Into<String>) -> Self {
        FluxQuery {
            bucket: bucket.into(),
            stages: Vec::new(),
        }
    }

    pub fn range(mut self, start: RangeStart) -> Self {
        self.stages.push(Stage::Range(start));
        self
    }

    pub fn filter_eq(mut self, column: &str, value: &str) -> Self {
        self.stages.push(Stage::FilterEq {
            column: column.to_string(),
            value: value.to_string(),
        });
        self
    }

    /// Keeps rows whose `column` equals any of `values`.
    pub fn filter_any(mut self, column: &str, values: &[&str]) -> Self {
        self.stages.push(Stage::FilterAny {
            column: column.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn pivot(mut self, row_key: &str, column_key: &str, value_column: &str) -> Self {
        self.stages.push(Stage::Pivot {
            row_key: row_key.to_string(),
            column_key: column_key.to_string(),
            value_column: value_column.to_string(),
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.stages.push(Stage::Limit(n));
        self
    }
}

impl fmt::Display for FluxQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "from(bucket: {})", string_literal(&self.bucket))?;
        for stage in &self.stages {
            write!(f, "\n  |> {}", stage)?;
        }
        Ok(())
    }
}

/// Parameters of the `/latest` query, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameters {
    pub bucket: String,
    pub range_start: RangeStart,
    pub max_rows: usize,
}

impl QueryParameters {
    pub fn new(bucket: &str, range_start: &str) -> Result<Self, QueryBuildError> {
        if bucket.trim().is_empty() {
            return Err(QueryBuildError::EmptyBucket);
        }
        Ok(QueryParameters {
            bucket: bucket.to_string(),
            range_start: RangeStart::parse(range_start)?,
            max_rows: MAX_ROWS,
        })
    }

    /// Latest AQI readings: one pivoted row per timestamp, capped at `max_rows`.
    ///
    /// No sort is applied, so rows come back in the store's natural order.
    pub fn latest_query(&self) -> FluxQuery {
        FluxQuery::from_bucket(self.bucket.clone())
            .range(self.range_start.clone())
            .filter_eq("_measurement", MEASUREMENT)
            .filter_any("_field", &AQI_FIELDS)
            .pivot("_time", "_field", "_value")
            .limit(self.max_rows)
    }
}
