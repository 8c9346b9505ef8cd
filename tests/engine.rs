//! Integration tests for the dedup engine against the in-memory store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tracededup::{
    resolve_records, AtomicProgressTracker, DedupConfig, DedupEngine, DedupError, Direction,
    MemoryStore, PersistStatus, Record, RecordStore, RouteScope, RunMode, RunPhase, RunProgress,
    SkipReason, StoreSession,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Two acquisitions driven over the same stretch: a "+" pass and a "-" pass.
/// Every "+" capture loses to the "-" capture next to it.
fn opposing_passes(route: &str, steps: usize) -> Vec<Record> {
    let day = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let mut records = Vec::new();
    for step in 0..steps {
        let position = step as f64 * 20.0;
        records.push(
            Record::new(format!("{}-p{}", route, step), route, position)
                .acquisition(format!("{}-up", route))
                .direction(Direction::Plus)
                .sequence(step as i64)
                .captured_at(day)
                .quality(0.2),
        );
        records.push(
            Record::new(format!("{}-m{}", route, step), route, position + 2.0)
                .acquisition(format!("{}-down", route))
                .direction(Direction::Minus)
                .sequence(step as i64)
                .captured_at(day + Duration::hours(2))
                .quality(0.4),
        );
    }
    records
}

fn config() -> DedupConfig {
    DedupConfig {
        workers: Some(2),
        ..DedupConfig::default()
    }
}

fn plus_ids(route: &str, steps: usize) -> Vec<String> {
    (0..steps).map(|s| format!("{}-p{}", route, s)).collect()
}

/// Sets the cancel flag as soon as evaluation starts.
struct CancelOnEvaluate {
    flag: Arc<AtomicBool>,
}

impl RunProgress for CancelOnEvaluate {
    fn on_phase(&self, phase: RunPhase, _total: u32) {
        if phase == RunPhase::Evaluating {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
    fn on_progress(&self) {}
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_run_flags_expected_records() {
    let store = MemoryStore::with_records(opposing_passes("R1", 10));
    let mut engine = DedupEngine::new(store, config());

    let summary = engine.run().unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.status, PersistStatus::Committed);
    assert_eq!(summary.mode, RunMode::Commit);
    assert_eq!(summary.records_loaded, 20);
    assert_eq!(summary.routes_processed, 1);
    assert_eq!(summary.pairs_evaluated, 10);
    assert_eq!(summary.records_flagged, 10);
    assert_eq!(summary.rows_updated, 10);
    assert_eq!(summary.batches, 1);

    for id in plus_ids("R1", 10) {
        assert!(engine.store().is_obsolete(&id), "{} should be obsolete", id);
    }
    assert!(!engine.store().is_obsolete("R1-m0"));
    assert_eq!(engine.store().commit_count(), 1);
}

#[test]
fn test_documented_scenarios_end_to_end() {
    let d = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let records = vec![
        // Same session, relative gap 195, same direction
        Record::new("s1-a", "S1", 10.0)
            .acquisition("S1")
            .relative_position(5.0)
            .direction(Direction::Minus)
            .sequence(1)
            .captured_at(d)
            .quality(0.2),
        Record::new("s1-b", "S1", 12.0)
            .acquisition("S1")
            .relative_position(200.0)
            .direction(Direction::Minus)
            .sequence(2)
            .captured_at(d)
            .quality(0.5),
        // Different sessions, opposite directions
        Record::new("s2-a", "S2", 10.0)
            .acquisition("S1")
            .direction(Direction::Plus)
            .sequence(1)
            .captured_at(d)
            .quality(0.1),
        Record::new("s2-b", "S2", 11.0)
            .acquisition("S2")
            .direction(Direction::Minus)
            .sequence(1)
            .captured_at(d)
            .quality(0.9),
        // Different sessions, 60 days apart
        Record::new("s3-a", "S3", 10.0)
            .acquisition("S2")
            .direction(Direction::Minus)
            .sequence(1)
            .captured_at(d)
            .quality(0.3),
        Record::new("s3-b", "S3", 11.0)
            .acquisition("S3")
            .direction(Direction::Minus)
            .sequence(1)
            .captured_at(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
            .quality(0.1),
        // Different sessions, 19 days apart
        Record::new("s4-a", "S4", 10.0)
            .acquisition("S2")
            .direction(Direction::Minus)
            .sequence(1)
            .captured_at(d)
            .quality(0.3),
        Record::new("s4-b", "S4", 11.0)
            .acquisition("S3")
            .direction(Direction::Minus)
            .sequence(1)
            .captured_at(Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap())
            .quality(0.1),
    ];

    let mut engine = DedupEngine::new(MemoryStore::with_records(records), config());
    let summary = engine.run().unwrap();

    assert_eq!(summary.routes_processed, 4);
    assert_eq!(summary.records_flagged, 4);
    for id in ["s1-a", "s2-a", "s3-a", "s4-a"] {
        assert!(engine.store().is_obsolete(id), "{} should lose", id);
    }
    for id in ["s1-b", "s2-b", "s3-b", "s4-b"] {
        assert!(!engine.store().is_obsolete(id), "{} should win", id);
    }
}

// ============================================================================
// Reset & Idempotence
// ============================================================================

#[test]
fn test_run_is_idempotent() {
    let mut records = opposing_passes("A", 8);
    records.extend(opposing_passes("B", 5));
    let mut engine = DedupEngine::new(MemoryStore::with_records(records), config());

    let first = engine.run().unwrap();
    let after_first = engine.store_mut().flagged_ids(&RouteScope::All).unwrap();
    let second = engine.run().unwrap();
    let after_second = engine.store_mut().flagged_ids(&RouteScope::All).unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(first.records_flagged, second.records_flagged);
    // The second run clears exactly what the first one set
    assert_eq!(second.records_reset, first.records_flagged);
    assert_eq!(second.records_loaded, first.records_loaded);
}

#[test]
fn test_stale_flags_are_cleared() {
    let mut store = MemoryStore::with_records(opposing_passes("A", 3));
    store.set_obsolete("A-m1", true);
    let mut engine = DedupEngine::new(store, config());

    let summary = engine.run().unwrap();

    assert_eq!(summary.records_reset, 1);
    assert!(!engine.store().is_obsolete("A-m1"));
    assert!(engine.store().is_obsolete("A-p1"));
}

#[test]
fn test_reset_clears_every_flag_in_scope() {
    let mut store = MemoryStore::with_records(opposing_passes("A", 4));
    for id in ["A-p0", "A-m2", "A-m3"] {
        store.set_obsolete(id, true);
    }

    let mut session = store.begin().unwrap();
    let cleared = session.reset_flags(&RouteScope::All).unwrap();
    assert_eq!(cleared, 3);
    assert!(session.flagged_ids(&RouteScope::All).unwrap().is_empty());
    assert_eq!(session.fetch_active(&RouteScope::All).unwrap().len(), 8);
    session.rollback().unwrap();

    // Rolled back: the committed flags are untouched
    assert_eq!(store.flagged_ids(&RouteScope::All).unwrap().len(), 3);
}

#[test]
fn test_route_subset_leaves_other_routes_untouched() {
    let mut records = opposing_passes("A", 4);
    records.extend(opposing_passes("B", 4));
    let mut store = MemoryStore::with_records(records);
    store.set_obsolete("B-m0", true);

    let config = DedupConfig {
        routes: Some(vec!["A".to_string()]),
        ..config()
    };
    let mut engine = DedupEngine::new(store, config);
    let summary = engine.run().unwrap();

    assert_eq!(summary.records_reset, 0);
    assert_eq!(summary.records_loaded, 8);
    assert_eq!(summary.records_flagged, 4);
    // B is outside the scope: its flags stay exactly as they were
    assert!(engine.store().is_obsolete("B-m0"));
    assert!(!engine.store().is_obsolete("B-p0"));
    assert!(engine.store().is_obsolete("A-p0"));
}

/// Route A holds a "+" capture `x` that would lose to `a2`; route B holds
/// another record with the same identifier.
fn shared_identifier_records() -> Vec<Record> {
    let day = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let build = |id: &str, route: &str, acq: &str, position: f64, direction: Direction| {
        Record::new(id, route, position)
            .acquisition(acq)
            .direction(direction)
            .sequence(1)
            .captured_at(day)
            .quality(0.5)
    };
    vec![
        build("x", "A", "S1", 1.0, Direction::Plus),
        build("a2", "A", "S2", 2.0, Direction::Minus),
        build("x", "B", "S3", 1.0, Direction::Plus),
        build("b2", "B", "S4", 50.0, Direction::Minus),
    ]
}

fn obsolete_in_route(store: &MemoryStore, id: &str, route: &str) -> bool {
    store
        .records()
        .iter()
        .any(|r| r.id == id && r.route_id == route && r.obsolete)
}

#[test]
fn test_scoped_run_detects_duplicate_outside_scope() {
    let config = DedupConfig {
        routes: Some(vec!["A".to_string()]),
        ..config()
    };
    let store = MemoryStore::with_records(shared_identifier_records());
    let mut engine = DedupEngine::new(store, config);

    let summary = engine.run().unwrap();

    assert_eq!(summary.duplicate_ids, 1);
    assert_eq!(summary.routes_processed, 0);
    assert_eq!(summary.routes_skipped.len(), 1);
    assert_eq!(
        summary.routes_skipped[0].reason,
        SkipReason::DuplicateIdentifier { id: "x".to_string() }
    );
    assert_eq!(summary.records_flagged, 0);
    assert!(!obsolete_in_route(engine.store(), "x", "B"));
    assert!(!obsolete_in_route(engine.store(), "x", "A"));
}

#[test]
fn test_scoped_write_never_touches_other_routes() {
    let mut store = MemoryStore::with_records(shared_identifier_records());

    let mut session = store.begin().unwrap();
    let duplicates: Vec<String> = session.duplicate_ids().unwrap().into_iter().collect();
    assert_eq!(duplicates, vec!["x"]);
    let updated = session
        .flag_obsolete(&["x".to_string()], &RouteScope::routes(["A"]))
        .unwrap();
    session.commit().unwrap();

    assert_eq!(updated, 1);
    assert!(obsolete_in_route(&store, "x", "A"));
    assert!(!obsolete_in_route(&store, "x", "B"));
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_small_batches() {
    let store = MemoryStore::with_records(opposing_passes("A", 25));
    let config = DedupConfig {
        batch_size: 10,
        ..config()
    };
    let mut engine = DedupEngine::new(store, config);

    let summary = engine.run().unwrap();

    assert_eq!(summary.records_flagged, 25);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.rows_updated, 25);
}

#[test]
fn test_failed_batch_rolls_back_whole_run() {
    let mut store = MemoryStore::with_records(opposing_passes("A", 25)).fail_on_batch(2);
    store.set_obsolete("A-m5", true);
    let config = DedupConfig {
        batch_size: 10,
        ..config()
    };
    let mut engine = DedupEngine::new(store, config);

    let err = engine.run().unwrap_err();

    assert!(matches!(err, DedupError::PersistAborted { batch: 2, .. }));
    // Neither the reset nor the first batch reached the store
    let flagged = engine.store_mut().flagged_ids(&RouteScope::All).unwrap();
    assert_eq!(flagged.len(), 1);
    assert!(flagged.contains("A-m5"));
    assert_eq!(engine.store().commit_count(), 0);
}

#[test]
fn test_dry_run_leaves_store_unchanged() {
    let mut store = MemoryStore::with_records(opposing_passes("A", 6));
    store.set_obsolete("A-m0", true);
    let mut engine = DedupEngine::new(store, config());

    let summary = engine.dry_run().unwrap();

    assert_eq!(summary.mode, RunMode::DryRun);
    assert_eq!(summary.status, PersistStatus::DryRun);
    assert!(!summary.is_success());
    assert_eq!(summary.records_reset, 1);
    assert_eq!(summary.records_flagged, 6);
    assert!(engine.store().is_obsolete("A-m0"));
    assert!(!engine.store().is_obsolete("A-p0"));
    assert_eq!(engine.store().commit_count(), 0);
}

// ============================================================================
// Cancellation & Progress
// ============================================================================

#[test]
fn test_cancel_before_persist_has_no_effect() {
    let mut store = MemoryStore::with_records(opposing_passes("A", 6));
    store.set_obsolete("A-m0", true);
    let engine = DedupEngine::new(store, config());
    let flag = engine.cancel_handle();
    let mut engine = engine.with_progress(Arc::new(CancelOnEvaluate { flag }));

    let err = engine.run().unwrap_err();

    assert!(matches!(err, DedupError::Cancelled));
    assert!(engine.store().is_obsolete("A-m0"));
    assert!(!engine.store().is_obsolete("A-p0"));
    assert_eq!(engine.store().commit_count(), 0);
}

#[test]
fn test_cancel_flag_is_cleared_between_runs() {
    let store = MemoryStore::with_records(opposing_passes("A", 3));
    let mut engine = DedupEngine::new(store, config());

    engine.cancel_handle().store(true, Ordering::SeqCst);
    let summary = engine.run().unwrap();

    assert!(summary.is_success());
}

#[test]
fn test_progress_reaches_persisting() {
    let tracker = Arc::new(AtomicProgressTracker::new());
    let store = MemoryStore::with_records(opposing_passes("A", 12));
    let config = DedupConfig {
        batch_size: 5,
        ..config()
    };
    let mut engine = DedupEngine::new(store, config).with_progress(tracker.clone());

    engine.run().unwrap();

    assert_eq!(tracker.phase(), "persisting");
    assert_eq!(tracker.counts(), (3, 3));
}

// ============================================================================
// Integrity & Configuration
// ============================================================================

#[test]
fn test_skipped_routes_reported() {
    let mut records = opposing_passes("A", 3);
    records.extend(opposing_passes("B", 3));
    records.push(Record::new("lonely", "C", 0.0));
    // B carries an identifier that also exists in A
    records.push(Record::new("A-p0", "B", 100.0));

    let mut engine = DedupEngine::new(MemoryStore::with_records(records), config());
    let summary = engine.run().unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.routes_processed, 0);
    assert_eq!(summary.duplicate_ids, 1);
    assert_eq!(summary.routes_skipped.len(), 3);
    assert_eq!(
        summary.routes_skipped[2].reason,
        SkipReason::TooFewRecords { count: 1 }
    );
    assert_eq!(summary.records_flagged, 0);
}

#[test]
fn test_invalid_config_rejected_before_touching_store() {
    let mut store = MemoryStore::with_records(opposing_passes("A", 3));
    store.set_obsolete("A-m0", true);
    let config = DedupConfig {
        distance_threshold: 0.0,
        ..config()
    };
    let mut engine = DedupEngine::new(store, config);

    let err = engine.run().unwrap_err();

    assert!(matches!(
        err,
        DedupError::InvalidConfig {
            field: "distance_threshold",
            ..
        }
    ));
    assert!(engine.store().is_obsolete("A-m0"));
}

#[test]
fn test_resolve_records_without_store() {
    let (partition, resolution) = resolve_records(opposing_passes("A", 4), &config()).unwrap();

    assert_eq!(partition.units.len(), 1);
    assert!(resolution.is_complete());
    let expected: Vec<String> = plus_ids("A", 4);
    assert_eq!(resolution.obsolete.iter().cloned().collect::<Vec<_>>(), expected);
}
