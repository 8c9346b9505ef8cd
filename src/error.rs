//! Unified error handling for duplicate resolution.
//!
//! Three layers of failure exist and only the first is fatal:
//! - [`DedupError`] aborts a run (config, store, persistence, cancellation)
//! - [`SkipReason`] drops a whole route from evaluation with a warning
//! - [`ComparisonError`] drops a single candidate pair

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal errors surfaced to the caller of a run.
#[derive(Debug, Error)]
pub enum DedupError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {field} = {value} ({reason})")]
    InvalidConfig {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    /// The record store reported a failure.
    #[error("store error: {0}")]
    Store(String),

    /// SQLite backend error.
    #[cfg(feature = "persistence")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A batch write failed; the whole persist step was rolled back.
    #[error("persist aborted at batch {batch}: {source}")]
    PersistAborted {
        batch: usize,
        #[source]
        source: Box<DedupError>,
    },

    /// The worker pool could not be started.
    #[error("worker pool error: {0}")]
    WorkerPool(String),

    /// The run was cancelled before committing.
    #[error("run cancelled before commit")]
    Cancelled,

    /// Config file could not be read or parsed.
    #[error("failed to load config: {0}")]
    ConfigFile(String),
}

/// Result type for fallible operations.
pub type Result<T> = std::result::Result<T, DedupError>;

/// Why a candidate pair could not be evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComparisonError {
    #[error("capture {id} has non-finite quality score {value}")]
    NonFiniteQuality { id: String, value: f64 },

    #[error("capture {id} has non-finite relative position {value}")]
    NonFiniteRelativePosition { id: String, value: f64 },
}

/// Why a route was excluded from evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// At least one identifier in the route also appears elsewhere in the input.
    DuplicateIdentifier { id: String },
    /// A record is missing a value the rules need.
    MissingField { id: String, field: String },
    /// A record's linear position is NaN or infinite.
    NonFinitePosition { id: String },
    /// Fewer than two records, so no candidate pair can exist.
    TooFewRecords { count: usize },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DuplicateIdentifier { id } => write!(f, "duplicate identifier {}", id),
            SkipReason::MissingField { id, field } => {
                write!(f, "record {} is missing {}", id, field)
            }
            SkipReason::NonFinitePosition { id } => {
                write!(f, "record {} has a non-finite linear position", id)
            }
            SkipReason::TooFewRecords { count } => write!(f, "only {} record(s)", count),
        }
    }
}

/// Extension trait for turning missing record fields into skip reasons.
pub trait OptionExt<T> {
    fn ok_or_missing(self, id: &str, field: &str) -> std::result::Result<T, SkipReason>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_missing(self, id: &str, field: &str) -> std::result::Result<T, SkipReason> {
        self.ok_or_else(|| SkipReason::MissingField {
            id: id.to_string(),
            field: field.to_string(),
        })
    }
}
