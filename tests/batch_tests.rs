//! Batch Execution Tests
//!
//! Covers Scenario E and the batch boundaries:
//! - Result ordering by input index with mixed success/failure
//! - Empty batch rejection
//! - Per-item execution logging
//! - Cancellation marking remaining records

use ruleflow::executor::{BatchOptions, ItemOutcome};
use ruleflow::{
    CancelToken, Config, MemoryRepository, Operator, Rule, RuleService, Value,
};
use std::collections::HashMap;
use std::sync::Arc;

fn service() -> RuleService {
    let repo = Arc::new(MemoryRepository::new());
    let mut patterns = HashMap::new();
    patterns.insert("Y".to_string(), "Approved".to_string());
    repo.seed(
        vec![
            Rule::simple("R1", "issue threshold", "issue", Operator::GreaterThan, Value::Int(30))
                .with_score(20.0, 30.0),
        ],
        vec![],
        patterns,
    );
    let service = RuleService::new(Config::default(), repo);
    service.reload().unwrap();
    service
}

// ============================================================================
// Scenario E: mixed batch, ordering preserved
// ============================================================================

#[test]
fn test_scenario_e_mixed_batch_ordering() {
    let service = service();
    let batch = service
        .execute_batch(
            vec![
                serde_json::json!({"issue": 35}),
                serde_json::json!({"issue": 5}),
                serde_json::json!("malformed"),
            ],
            &BatchOptions {
                max_workers: Some(3),
                dry_run: false,
            },
            &CancelToken::new(),
        )
        .unwrap();

    assert_eq!(batch.summary.total, 3);
    assert_eq!(batch.summary.successful, 2);
    assert_eq!(batch.summary.failed, 1);
    assert!((batch.summary.success_rate - 2.0 / 3.0).abs() < 1e-12);

    assert_eq!(batch.results[0].index, 0);
    assert_eq!(
        batch.results[0].outcome,
        ItemOutcome::Success {
            total_points: 600.0,
            pattern_result: "Y".to_string(),
            action_recommendation: Some("Approved".to_string()),
        }
    );
    assert_eq!(
        batch.results[1].outcome,
        ItemOutcome::Success {
            total_points: 0.0,
            pattern_result: "-".to_string(),
            action_recommendation: None,
        }
    );
    assert!(matches!(
        &batch.results[2].outcome,
        ItemOutcome::Failure { error_type, .. } if error_type == "InputValidationError"
    ));
}

#[test]
fn test_large_batch_keeps_input_order() {
    let service = service();
    let records: Vec<serde_json::Value> = (0..200)
        .map(|i| serde_json::json!({"issue": i}))
        .collect();
    let batch = service
        .execute_batch(
            records,
            &BatchOptions {
                max_workers: Some(8),
                dry_run: true,
            },
            &CancelToken::new(),
        )
        .unwrap();

    for (i, item) in batch.results.iter().enumerate() {
        assert_eq!(item.index, i);
        let expected = if i > 30 { "Y" } else { "-" };
        match &item.outcome {
            ItemOutcome::Success { pattern_result, .. } => assert_eq!(pattern_result, expected),
            other => panic!("unexpected outcome at {}: {:?}", i, other),
        }
    }
}

// ============================================================================
// Boundaries
// ============================================================================

#[test]
fn test_empty_batch_rejected() {
    let service = service();
    let err = service
        .execute_batch(Vec::new(), &BatchOptions::default(), &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), "InputValidationError");
}

#[test]
fn test_batch_logs_per_item_but_not_dry_run() {
    let service = service();
    service
        .execute_batch(
            vec![serde_json::json!({"issue": 35}), serde_json::json!({"issue": 1})],
            &BatchOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
    service.flush_logs();
    assert_eq!(service.repository().executions(10).unwrap().len(), 2);

    service
        .execute_batch(
            vec![serde_json::json!({"issue": 35})],
            &BatchOptions {
                max_workers: None,
                dry_run: true,
            },
            &CancelToken::new(),
        )
        .unwrap();
    service.flush_logs();
    // Still two: dry runs append nothing.
    assert_eq!(service.repository().executions(10).unwrap().len(), 2);
}

#[test]
fn test_cancelled_batch_marks_remaining() {
    let service = service();
    let cancel = CancelToken::new();
    cancel.cancel();

    let batch = service
        .execute_batch(
            vec![serde_json::json!({"issue": 35}), serde_json::json!({"issue": 1})],
            &BatchOptions::default(),
            &cancel,
        )
        .unwrap();
    assert_eq!(batch.summary.cancelled, 2);
    assert!(batch
        .results
        .iter()
        .all(|r| r.outcome == ItemOutcome::Cancelled));
}
