//! # Trace Dedup
//!
//! Spatial-temporal duplicate resolution for geo-located captures recorded
//! repeatedly along linear routes.
//!
//! This library provides:
//! - Route partitioning with input integrity checks
//! - Windowed neighbor search over linear position
//! - A deterministic tie-break policy (acquisition, direction, recency, quality)
//! - Parallel per-route resolution with fault isolation
//! - Idempotent, transactional reset and batched persistence of obsolete flags
//!
//! ## Features
//!
//! - **`parallel`** - Evaluate routes on a bounded rayon pool (default)
//! - **`persistence`** - SQLite-backed record store (default)
//! - **`synthetic`** - Seeded synthetic dataset generator for benches and tests
//! - **`cli`** - Build the `tracededup-cli` binary
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use tracededup::{DedupConfig, DedupEngine, Direction, MemoryStore, Record};
//!
//! let day = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let records = vec![
//!     Record::new("a", "D1", 10.0)
//!         .acquisition("S1")
//!         .direction(Direction::Plus)
//!         .sequence(1)
//!         .captured_at(day)
//!         .quality(0.2),
//!     Record::new("b", "D1", 11.0)
//!         .acquisition("S2")
//!         .direction(Direction::Minus)
//!         .sequence(1)
//!         .captured_at(day)
//!         .quality(0.4),
//! ];
//!
//! let mut engine = DedupEngine::new(MemoryStore::with_records(records), DedupConfig::default());
//! let summary = engine.run().unwrap();
//! assert_eq!(summary.records_flagged, 1);
//! assert!(engine.store().is_obsolete("a"));
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{ComparisonError, DedupError, OptionExt, Result, SkipReason};

// Route partitioning (grouping, ordering, validation)
pub mod partition;
pub use partition::{
    partition_routes, partition_routes_with, Partition, RouteUnit, SkippedRoute,
};

// Windowed neighbor search
pub mod neighbors;
pub use neighbors::{candidate_pairs, NeighborPairs};

// Tie-break policy for candidate pairs
pub mod rules;
pub use rules::{evaluate_pair, Decision, DecisionReason, PairKind, RulePolicy};

// Per-route resolution and parallel coordination
pub mod coordinator;
pub use coordinator::{
    resolve_route, resolve_routes, resolve_routes_with, Resolution, RouteFailure, RouteOutcome,
};

// Progress reporting for long runs
pub mod progress;
pub use progress::{AtomicProgressTracker, NoopProgress, RunPhase, RunProgress};

// Read/write interface to the record store
pub mod store;
#[cfg(feature = "persistence")]
pub use store::SqliteStore;
pub use store::{MemoryStore, RecordStore, StoreSession};

// Run orchestration: reset, resolve, persist
pub mod engine;
pub use engine::{resolve_records, DedupEngine, PersistStatus, RunMode, RunSummary};

// Synthetic datasets for stress testing
#[cfg(feature = "synthetic")]
pub mod synthetic;

/// Identifiers selected for flagging during one run.
///
/// Ordered so that persist batches are deterministic.
pub type ObsoleteSet = BTreeSet<String>;

// ============================================================================
// Core Types
// ============================================================================

/// Travel direction of a capture along its route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Captured travelling with increasing linear position ("+").
    #[serde(rename = "+")]
    Plus,
    /// Captured travelling against the route ("-").
    #[serde(rename = "-")]
    Minus,
}

impl Direction {
    /// Parse the symbolic direction stored alongside a record.
    ///
    /// Surrounding whitespace is ignored; anything other than `+` or `-`
    /// yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "+" => Some(Direction::Plus),
            "-" => Some(Direction::Minus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Plus => "+",
            Direction::Minus => "-",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored observation as returned by the record store.
///
/// Nullable columns are kept as `Option` so that integrity problems can be
/// reported per route instead of failing the whole load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub route_id: String,
    /// Linear position along the route (distance units)
    pub position: Option<f64>,
    /// Linear position relative to the start of its own acquisition
    pub relative_position: Option<f64>,
    pub acquisition_id: Option<String>,
    pub direction: Option<Direction>,
    /// Sequence index within the acquisition
    pub sequence_index: Option<i64>,
    pub captured_at: Option<DateTime<Utc>>,
    /// Quality score, higher is worse
    pub quality: Option<f64>,
    #[serde(default)]
    pub obsolete: bool,
}

impl Record {
    /// Create a record with only its identity and position set.
    pub fn new(id: impl Into<String>, route_id: impl Into<String>, position: f64) -> Self {
        Self {
            id: id.into(),
            route_id: route_id.into(),
            position: Some(position),
            relative_position: None,
            acquisition_id: None,
            direction: None,
            sequence_index: None,
            captured_at: None,
            quality: None,
            obsolete: false,
        }
    }

    pub fn acquisition(mut self, acquisition_id: impl Into<String>) -> Self {
        self.acquisition_id = Some(acquisition_id.into());
        self
    }

    pub fn relative_position(mut self, relative_position: f64) -> Self {
        self.relative_position = Some(relative_position);
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn sequence(mut self, sequence_index: i64) -> Self {
        self.sequence_index = Some(sequence_index);
        self
    }

    pub fn captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = Some(captured_at);
        self
    }

    pub fn quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn obsolete(mut self, obsolete: bool) -> Self {
        self.obsolete = obsolete;
        self
    }
}

/// A record whose required fields have all been checked.
///
/// Only captures take part in neighbor search and rule evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub id: String,
    pub position: f64,
    pub relative_position: Option<f64>,
    pub acquisition_id: String,
    pub direction: Direction,
    pub sequence_index: i64,
    pub captured_at: DateTime<Utc>,
    pub quality: f64,
}

impl TryFrom<&Record> for Capture {
    type Error = SkipReason;

    fn try_from(record: &Record) -> std::result::Result<Self, SkipReason> {
        let id = record.id.as_str();
        let position = record.position.ok_or_missing(id, "position")?;
        if !position.is_finite() {
            return Err(SkipReason::NonFinitePosition { id: id.to_string() });
        }

        Ok(Self {
            id: id.to_string(),
            position,
            relative_position: record.relative_position,
            acquisition_id: record
                .acquisition_id
                .clone()
                .filter(|a| !a.is_empty())
                .ok_or_missing(id, "acquisition_id")?,
            direction: record.direction.ok_or_missing(id, "direction")?,
            sequence_index: record.sequence_index.ok_or_missing(id, "sequence_index")?,
            captured_at: record.captured_at.ok_or_missing(id, "captured_at")?,
            quality: record.quality.ok_or_missing(id, "quality")?,
        })
    }
}

/// Which routes a run touches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RouteScope {
    /// Every route in the store.
    #[default]
    All,
    /// Only the named routes.
    Routes(BTreeSet<String>),
}

impl RouteScope {
    pub fn routes<I, S>(routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RouteScope::Routes(routes.into_iter().map(Into::into).collect())
    }

    /// Check whether a route falls inside this scope.
    pub fn contains(&self, route_id: &str) -> bool {
        match self {
            RouteScope::All => true,
            RouteScope::Routes(routes) => routes.contains(route_id),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a duplicate-resolution run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Maximum linear-position difference for two captures to be compared.
    /// Default: 6.0 distance units
    pub distance_threshold: f64,

    /// Worker pool size. `None` uses the platform's available parallelism.
    pub workers: Option<usize>,

    /// Restrict the run to these routes. `None` processes every route.
    pub routes: Option<Vec<String>>,

    /// Maximum identifiers per persist batch.
    /// Default: 5000
    pub batch_size: usize,

    /// Relative-position window under which two captures of the same
    /// acquisition count as one continuous sweep.
    /// Default: 100.0 distance units
    pub continuity_window: f64,

    /// Capture-date gap (whole days) beyond which the older capture loses.
    /// Default: 30
    pub stale_after_days: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 6.0,
            workers: None,
            routes: None,
            batch_size: 5000,
            continuity_window: 100.0,
            stale_after_days: 30,
        }
    }
}

impl DedupConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DedupError::ConfigFile(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| DedupError::ConfigFile(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.distance_threshold.is_finite() || self.distance_threshold <= 0.0 {
            return Err(DedupError::InvalidConfig {
                field: "distance_threshold",
                value: self.distance_threshold.to_string(),
                reason: "must be a positive finite number",
            });
        }
        if self.workers == Some(0) {
            return Err(DedupError::InvalidConfig {
                field: "workers",
                value: "0".to_string(),
                reason: "must be at least 1",
            });
        }
        if self.batch_size == 0 {
            return Err(DedupError::InvalidConfig {
                field: "batch_size",
                value: "0".to_string(),
                reason: "must be at least 1",
            });
        }
        if !self.continuity_window.is_finite() || self.continuity_window < 0.0 {
            return Err(DedupError::InvalidConfig {
                field: "continuity_window",
                value: self.continuity_window.to_string(),
                reason: "must be a non-negative finite number",
            });
        }
        if self.stale_after_days < 0 {
            return Err(DedupError::InvalidConfig {
                field: "stale_after_days",
                value: self.stale_after_days.to_string(),
                reason: "must not be negative",
            });
        }
        Ok(())
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Route scope described by the `routes` filter.
    pub fn scope(&self) -> RouteScope {
        match &self.routes {
            Some(routes) => RouteScope::routes(routes.iter().cloned()),
            None => RouteScope::All,
        }
    }

    /// Tie-break parameters derived from this config.
    pub fn rule_policy(&self) -> RulePolicy {
        RulePolicy {
            continuity_window: self.continuity_window,
            stale_after_days: self.stale_after_days,
        }
    }
}
