//! Route partitioning.
//!
//! Groups the record stream by route, validates every record into a
//! [`Capture`], and orders each route by linear position so neighbor search
//! can use a bounded window. Routes that cannot be evaluated safely are
//! reported as [`SkippedRoute`]s rather than failing the run.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{Capture, Record, RouteScope, SkipReason};

/// One independent unit of work: a single route, sorted and validated.
#[derive(Debug, Clone)]
pub struct RouteUnit {
    pub route_id: String,
    /// Captures sorted ascending by position, ties broken by identifier
    pub captures: Vec<Capture>,
    pub distance_threshold: f64,
}

impl RouteUnit {
    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }
}

/// A route excluded from evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRoute {
    pub route_id: String,
    pub record_count: usize,
    pub reason: SkipReason,
}

/// Output of [`partition_routes`].
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// Work units in route-identifier order
    pub units: Vec<RouteUnit>,
    pub skipped: Vec<SkippedRoute>,
    /// Identifiers seen more than once in the input
    pub duplicate_ids: BTreeSet<String>,
}

impl Partition {
    /// Total captures across all work units.
    pub fn capture_count(&self) -> usize {
        self.units.iter().map(RouteUnit::len).sum()
    }
}

/// Order two captures by position, then identifier.
fn capture_order(a: &Capture, b: &Capture) -> std::cmp::Ordering {
    a.position
        .total_cmp(&b.position)
        .then_with(|| a.id.cmp(&b.id))
}

/// Partition records into per-route work units.
///
/// Obsolete records and records outside `scope` are ignored. A route is
/// skipped when it has fewer than two records, when any of its identifiers
/// is duplicated anywhere in the input, or when any record fails
/// validation. Duplicates are counted over every input record, including
/// those outside the scope.
pub fn partition_routes<I>(records: I, scope: &RouteScope, distance_threshold: f64) -> Partition
where
    I: IntoIterator<Item = Record>,
{
    partition_routes_with(records, scope, distance_threshold, &BTreeSet::new())
}

/// Like [`partition_routes`], with identifiers already known to be
/// duplicated elsewhere in the dataset (e.g. in rows the store did not
/// return for this scope).
pub fn partition_routes_with<I>(
    records: I,
    scope: &RouteScope,
    distance_threshold: f64,
    known_duplicates: &BTreeSet<String>,
) -> Partition
where
    I: IntoIterator<Item = Record>,
{
    let mut id_counts: HashMap<String, usize> = HashMap::new();
    let mut by_route: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for record in records {
        *id_counts.entry(record.id.clone()).or_insert(0) += 1;
        if record.obsolete || !scope.contains(&record.route_id) {
            continue;
        }
        by_route
            .entry(record.route_id.clone())
            .or_default()
            .push(record);
    }

    let mut duplicate_ids: BTreeSet<String> = id_counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, _)| id)
        .collect();
    duplicate_ids.extend(known_duplicates.iter().cloned());
    for id in &duplicate_ids {
        warn!("[Partition] identifier {} appears more than once in the dataset", id);
    }

    let mut partition = Partition {
        duplicate_ids,
        ..Partition::default()
    };

    for (route_id, records) in by_route {
        match build_unit(&route_id, &records, &partition.duplicate_ids, distance_threshold) {
            Ok(unit) => partition.units.push(unit),
            Err(reason) => {
                if matches!(reason, SkipReason::TooFewRecords { .. }) {
                    debug!("[Partition] route {} skipped: {}", route_id, reason);
                } else {
                    warn!("[Partition] route {} skipped: {}", route_id, reason);
                }
                partition.skipped.push(SkippedRoute {
                    route_id,
                    record_count: records.len(),
                    reason,
                });
            }
        }
    }

    debug!(
        "[Partition] partitioned {} captures into {} routes ({} skipped)",
        partition.capture_count(),
        partition.units.len(),
        partition.skipped.len()
    );

    partition
}

fn build_unit(
    route_id: &str,
    records: &[Record],
    duplicate_ids: &BTreeSet<String>,
    distance_threshold: f64,
) -> Result<RouteUnit, SkipReason> {
    if records.len() < 2 {
        return Err(SkipReason::TooFewRecords {
            count: records.len(),
        });
    }

    if let Some(dup) = records.iter().find(|r| duplicate_ids.contains(&r.id)) {
        return Err(SkipReason::DuplicateIdentifier { id: dup.id.clone() });
    }

    let mut captures = records
        .iter()
        .map(Capture::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    captures.sort_by(capture_order);

    Ok(RouteUnit {
        route_id: route_id.to_string(),
        captures,
        distance_threshold,
    })
}
