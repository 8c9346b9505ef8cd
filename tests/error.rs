//! Tests for error module

use tracededup::error::{ComparisonError, DedupError, OptionExt, SkipReason};

#[test]
fn test_error_display() {
    let err = DedupError::InvalidConfig {
        field: "batch_size",
        value: "0".to_string(),
        reason: "must be at least 1",
    };
    assert!(err.to_string().contains("batch_size"));
    assert!(err.to_string().contains("must be at least 1"));

    let err = ComparisonError::NonFiniteQuality {
        id: "c-9".to_string(),
        value: f64::NAN,
    };
    assert!(err.to_string().contains("c-9"));
}

#[test]
fn test_persist_aborted_keeps_source() {
    use std::error::Error;

    let err = DedupError::PersistAborted {
        batch: 3,
        source: Box::new(DedupError::Store("disk full".to_string())),
    };
    assert!(err.to_string().contains("batch 3"));
    let source = err.source().map(|s| s.to_string()).unwrap_or_default();
    assert!(source.contains("disk full"));
}

#[test]
fn test_option_ext() {
    let none: Option<f64> = None;
    let result = none.ok_or_missing("rec-1", "quality");
    assert_eq!(
        result,
        Err(SkipReason::MissingField {
            id: "rec-1".to_string(),
            field: "quality".to_string()
        })
    );
    assert_eq!(Some(2.5).ok_or_missing("rec-1", "quality"), Ok(2.5));
}

#[test]
fn test_skip_reason_json() {
    let reason = SkipReason::TooFewRecords { count: 1 };
    let json = serde_json::to_string(&reason).unwrap();
    assert_eq!(json, r#"{"kind":"too_few_records","count":1}"#);
    assert_eq!(reason.to_string(), "only 1 record(s)");
}
