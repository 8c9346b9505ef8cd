//! # Dedup Engine
//!
//! Orchestrates one run against a [`RecordStore`]:
//!
//! 1. open a session (one transaction for the whole run)
//! 2. reset obsolete flags for the scope
//! 3. read the active records and partition them by route
//! 4. resolve every route on the worker pool and merge the losers
//! 5. write the merged set in bounded batches, then commit
//!
//! Nothing is visible in the store until the final commit. Cancelling, a
//! failed route or a failed batch all roll the session back, so re-running
//! on unchanged data always converges to the same flag state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::coordinator::{resolve_routes, Resolution, RouteFailure};
use crate::partition::{partition_routes, partition_routes_with, Partition, SkippedRoute};
use crate::progress::{NoopProgress, RunPhase, RunProgress};
use crate::rules::DecisionReason;
use crate::store::{RecordStore, StoreSession};
use crate::{DedupConfig, DedupError, ObsoleteSet, Record, Result, RouteScope};

/// Whether a run commits its changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Reset, write and commit.
    Commit,
    /// Reset and write inside the transaction, then roll back.
    DryRun,
}

/// What happened to the store at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistStatus {
    /// Flags were reset and rewritten atomically.
    Committed,
    /// The run was a dry run; the store is unchanged.
    DryRun,
    /// At least one route failed; the store is unchanged.
    RolledBack,
}

/// User-facing report of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub mode: RunMode,
    pub status: PersistStatus,
    /// Records whose flag was cleared by the reset
    pub records_reset: usize,
    pub records_loaded: usize,
    pub routes_processed: usize,
    pub routes_skipped: Vec<SkippedRoute>,
    pub routes_failed: Vec<RouteFailure>,
    pub duplicate_ids: usize,
    pub pairs_evaluated: usize,
    pub pairs_skipped: usize,
    pub decisions: BTreeMap<DecisionReason, usize>,
    /// Distinct identifiers selected for flagging
    pub records_flagged: usize,
    /// Rows updated by the batch writes
    pub rows_updated: usize,
    pub batches: usize,
    pub elapsed_ms: u64,
}

impl RunSummary {
    /// True when every route completed and the result was committed.
    pub fn is_success(&self) -> bool {
        self.status == PersistStatus::Committed && self.routes_failed.is_empty()
    }

    fn new(mode: RunMode, partition: &Partition, resolution: &Resolution) -> Self {
        Self {
            mode,
            status: PersistStatus::RolledBack,
            records_reset: 0,
            records_loaded: 0,
            routes_processed: resolution.outcomes.len(),
            routes_skipped: partition.skipped.clone(),
            routes_failed: resolution.failures.clone(),
            duplicate_ids: partition.duplicate_ids.len(),
            pairs_evaluated: resolution.pairs_evaluated(),
            pairs_skipped: resolution.pairs_skipped(),
            decisions: resolution.decisions(),
            records_flagged: resolution.obsolete.len(),
            rows_updated: 0,
            batches: 0,
            elapsed_ms: 0,
        }
    }
}

/// Partition and resolve an in-memory record set without touching a store.
pub fn resolve_records(
    records: Vec<Record>,
    config: &DedupConfig,
) -> Result<(Partition, Resolution)> {
    config.validate()?;
    let partition = partition_routes(records, &config.scope(), config.distance_threshold);
    let resolution = resolve_routes(
        &partition.units,
        &config.rule_policy(),
        config.worker_count(),
        &NoopProgress,
        None,
    )?;
    Ok((partition, resolution))
}

/// Duplicate-resolution engine bound to a record store.
pub struct DedupEngine<S: RecordStore> {
    store: S,
    config: DedupConfig,
    progress: Arc<dyn RunProgress>,
    cancel: Arc<AtomicBool>,
}

impl<S: RecordStore> DedupEngine<S> {
    pub fn new(store: S, config: DedupConfig) -> Self {
        Self {
            store,
            config,
            progress: Arc::new(NoopProgress),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report progress to the given callback.
    pub fn with_progress(mut self, progress: Arc<dyn RunProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Flag that aborts the current run before commit when set.
    ///
    /// The flag is cleared at the start of every run.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Reset, resolve and commit.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.execute(RunMode::Commit)
    }

    /// Full run inside a transaction that is rolled back at the end.
    pub fn dry_run(&mut self) -> Result<RunSummary> {
        self.execute(RunMode::DryRun)
    }

    pub fn execute(&mut self, mode: RunMode) -> Result<RunSummary> {
        self.config.validate()?;
        self.cancel.store(false, Ordering::SeqCst);

        let started = Instant::now();
        let scope = self.config.scope();
        let progress = self.progress.as_ref();
        let cancel = self.cancel.as_ref();

        let mut session = self.store.begin()?;

        progress.on_phase(RunPhase::Resetting, 1);
        let records_reset = session.reset_flags(&scope)?;
        progress.on_progress();
        info!("[DedupEngine] reset {} obsolete flag(s)", records_reset);

        progress.on_phase(RunPhase::Loading, 1);
        let records = session.fetch_active(&scope)?;
        progress.on_progress();
        let records_loaded = records.len();
        info!("[DedupEngine] loaded {} active records", records_loaded);

        // Rows outside the scope can still share an identifier with rows inside it
        let known_duplicates = session.duplicate_ids()?;
        let partition = partition_routes_with(
            records,
            &scope,
            self.config.distance_threshold,
            &known_duplicates,
        );
        let resolution = resolve_routes(
            &partition.units,
            &self.config.rule_policy(),
            self.config.worker_count(),
            progress,
            Some(cancel),
        )?;

        if !resolution.cancelled.is_empty() {
            warn!(
                "[DedupEngine] run cancelled with {} route(s) unevaluated, rolling back",
                resolution.cancelled.len()
            );
            session.rollback()?;
            return Err(DedupError::Cancelled);
        }

        let mut summary = RunSummary::new(mode, &partition, &resolution);
        summary.records_reset = records_reset;
        summary.records_loaded = records_loaded;

        if !resolution.failures.is_empty() {
            error!(
                "[DedupEngine] {} route(s) failed, nothing will be persisted",
                resolution.failures.len()
            );
            session.rollback()?;
            summary.status = PersistStatus::RolledBack;
            summary.elapsed_ms = started.elapsed().as_millis() as u64;
            return Ok(summary);
        }

        info!(
            "[DedupEngine] {} record(s) selected across {} route(s)",
            resolution.obsolete.len(),
            resolution.outcomes.len()
        );

        let (rows_updated, batches) = match persist_batches(
            &mut session,
            &resolution.obsolete,
            &scope,
            self.config.batch_size,
            progress,
            cancel,
        ) {
            Ok(written) => written,
            Err(e) => {
                error!("[DedupEngine] persist failed, rolling back: {}", e);
                if let Err(rollback_err) = session.rollback() {
                    error!("[DedupEngine] rollback failed: {}", rollback_err);
                }
                return Err(e);
            }
        };
        summary.rows_updated = rows_updated;
        summary.batches = batches;

        summary.status = match mode {
            RunMode::Commit => {
                session.commit()?;
                PersistStatus::Committed
            }
            RunMode::DryRun => {
                session.rollback()?;
                PersistStatus::DryRun
            }
        };
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            "[DedupEngine] run finished ({:?}): {} routes processed, {} skipped, {} flagged in {}ms",
            summary.status,
            summary.routes_processed,
            summary.routes_skipped.len(),
            summary.records_flagged,
            summary.elapsed_ms
        );

        Ok(summary)
    }
}

/// Write the obsolete set in batches of at most `batch_size` identifiers.
///
/// Returns `(rows_updated, batches_written)`.
fn persist_batches<T: StoreSession>(
    session: &mut T,
    obsolete: &ObsoleteSet,
    scope: &RouteScope,
    batch_size: usize,
    progress: &dyn RunProgress,
    cancel: &AtomicBool,
) -> Result<(usize, usize)> {
    let ids: Vec<String> = obsolete.iter().cloned().collect();
    let total_batches = ids.len().div_ceil(batch_size.max(1));
    progress.on_phase(RunPhase::Persisting, total_batches as u32);

    let mut rows_updated = 0;
    for (batch, chunk) in ids.chunks(batch_size.max(1)).enumerate() {
        if cancel.load(Ordering::SeqCst) {
            return Err(DedupError::Cancelled);
        }
        rows_updated += session
            .flag_obsolete(chunk, scope)
            .map_err(|e| DedupError::PersistAborted {
                batch: batch + 1,
                source: Box::new(e),
            })?;
        progress.on_progress();

        if (batch + 1) % 10 == 0 {
            info!(
                "[DedupEngine] updated {} records so far ({}/{} batches)",
                rows_updated,
                batch + 1,
                total_batches
            );
        }
    }

    Ok((rows_updated, total_batches))
}
