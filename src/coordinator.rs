//! Per-route resolution and parallel coordination.
//!
//! Each [`RouteUnit`] is evaluated by exactly one worker. Workers share no
//! mutable state; each returns its route's losing identifiers by value and
//! the coordinator unions them. A worker that panics is isolated and its
//! route is reported as a [`RouteFailure`] instead of being silently dropped.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::neighbors::candidate_pairs;
use crate::progress::{RunPhase, RunProgress};
use crate::rules::{evaluate_pair, DecisionReason, RulePolicy};
use crate::{ObsoleteSet, Result, RouteUnit};

#[cfg(feature = "parallel")]
use crate::DedupError;

/// Result of evaluating one route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteOutcome {
    pub route_id: String,
    pub capture_count: usize,
    pub pairs_evaluated: usize,
    /// Pairs dropped because of malformed numeric fields
    pub pairs_skipped: usize,
    /// Number of decisions per branch of the rule tree
    pub decisions: BTreeMap<DecisionReason, usize>,
    /// Identifiers this route selected for flagging
    pub losers: ObsoleteSet,
}

/// A route whose worker did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteFailure {
    pub route_id: String,
    pub message: String,
}

/// Merged output of all route workers.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Union of every route's losers
    pub obsolete: ObsoleteSet,
    pub outcomes: Vec<RouteOutcome>,
    pub failures: Vec<RouteFailure>,
    /// Routes not started because the run was cancelled
    pub cancelled: Vec<String>,
}

impl Resolution {
    /// True when every route was evaluated to completion.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }

    pub fn pairs_evaluated(&self) -> usize {
        self.outcomes.iter().map(|o| o.pairs_evaluated).sum()
    }

    pub fn pairs_skipped(&self) -> usize {
        self.outcomes.iter().map(|o| o.pairs_skipped).sum()
    }

    /// Decision counts summed over all routes.
    pub fn decisions(&self) -> BTreeMap<DecisionReason, usize> {
        let mut totals = BTreeMap::new();
        for outcome in &self.outcomes {
            for (reason, count) in &outcome.decisions {
                *totals.entry(*reason).or_insert(0) += count;
            }
        }
        totals
    }
}

/// Evaluate every candidate pair of a single route.
///
/// Every pair is evaluated independently and every loser is kept, even if
/// the same capture already lost another comparison.
pub fn resolve_route(unit: &RouteUnit, policy: &RulePolicy) -> RouteOutcome {
    let mut outcome = RouteOutcome {
        route_id: unit.route_id.clone(),
        capture_count: unit.captures.len(),
        ..RouteOutcome::default()
    };

    for (i, j) in candidate_pairs(&unit.captures, unit.distance_threshold) {
        let a = &unit.captures[i];
        let b = &unit.captures[j];
        match evaluate_pair(a, b, policy) {
            Ok(decision) => {
                outcome.pairs_evaluated += 1;
                *outcome.decisions.entry(decision.reason()).or_insert(0) += 1;
                if let Some(loser) = decision.loser() {
                    outcome.losers.insert(loser.id.clone());
                }
            }
            Err(e) => {
                debug!(
                    "[Coordinator] route {} skipped pair ({}, {}): {}",
                    unit.route_id, a.id, b.id, e
                );
                outcome.pairs_skipped += 1;
            }
        }
    }

    if outcome.pairs_skipped > 0 {
        warn!(
            "[Coordinator] route {} skipped {} malformed pair(s)",
            unit.route_id, outcome.pairs_skipped
        );
    }
    debug!(
        "[Coordinator] route {}: {} captures, {} pairs, {} obsolete",
        unit.route_id,
        outcome.capture_count,
        outcome.pairs_evaluated,
        outcome.losers.len()
    );

    outcome
}

/// Resolve all routes on a worker pool of `workers` threads.
pub fn resolve_routes(
    units: &[RouteUnit],
    policy: &RulePolicy,
    workers: usize,
    progress: &dyn RunProgress,
    cancel: Option<&AtomicBool>,
) -> Result<Resolution> {
    resolve_routes_with(units, workers, progress, cancel, |unit| {
        resolve_route(unit, policy)
    })
}

enum UnitResult {
    Done(RouteOutcome),
    Failed(RouteFailure),
    Cancelled(String),
}

/// Resolve all routes with a custom per-route worker function.
///
/// The worker runs under panic isolation; a panicking route becomes a
/// [`RouteFailure`] and the remaining routes still complete.
pub fn resolve_routes_with<F>(
    units: &[RouteUnit],
    workers: usize,
    progress: &dyn RunProgress,
    cancel: Option<&AtomicBool>,
    worker: F,
) -> Result<Resolution>
where
    F: Fn(&RouteUnit) -> RouteOutcome + Sync,
{
    progress.on_phase(RunPhase::Evaluating, units.len() as u32);
    info!(
        "[Coordinator] evaluating {} routes on {} worker(s)",
        units.len(),
        workers
    );

    let run_one = |unit: &RouteUnit| -> UnitResult {
        if cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
            return UnitResult::Cancelled(unit.route_id.clone());
        }
        let result = match catch_unwind(AssertUnwindSafe(|| worker(unit))) {
            Ok(outcome) => UnitResult::Done(outcome),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("[Coordinator] route {} failed: {}", unit.route_id, message);
                UnitResult::Failed(RouteFailure {
                    route_id: unit.route_id.clone(),
                    message,
                })
            }
        };
        progress.on_progress();
        result
    };

    let results = run_units(units, workers, run_one)?;

    let mut resolution = Resolution::default();
    for result in results {
        match result {
            UnitResult::Done(outcome) => {
                resolution.obsolete.extend(outcome.losers.iter().cloned());
                resolution.outcomes.push(outcome);
            }
            UnitResult::Failed(failure) => resolution.failures.push(failure),
            UnitResult::Cancelled(route_id) => resolution.cancelled.push(route_id),
        }
    }

    if !resolution.failures.is_empty() {
        warn!(
            "[Coordinator] {} of {} routes failed to complete",
            resolution.failures.len(),
            units.len()
        );
    }

    Ok(resolution)
}

#[cfg(feature = "parallel")]
fn run_units<F>(units: &[RouteUnit], workers: usize, run_one: F) -> Result<Vec<UnitResult>>
where
    F: Fn(&RouteUnit) -> UnitResult + Sync,
{
    use rayon::prelude::*;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| DedupError::WorkerPool(e.to_string()))?;

    // Indexed collect keeps results in route order
    Ok(pool.install(|| units.par_iter().map(&run_one).collect()))
}

#[cfg(not(feature = "parallel"))]
fn run_units<F>(units: &[RouteUnit], _workers: usize, run_one: F) -> Result<Vec<UnitResult>>
where
    F: Fn(&RouteUnit) -> UnitResult + Sync,
{
    Ok(units.iter().map(run_one).collect())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
