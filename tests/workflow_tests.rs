//! Workflow Dispatch Tests
//!
//! Covers the chain-of-responsibility layer through the service:
//! - Built-in `evaluate` stage merges pipeline output into the record
//! - Custom handler factories
//! - Unknown stage names surface before any handler runs
//! - Concurrent workflow executions do not interfere

use ruleflow::workflow::{MapHandlerFactory, StageHandler, WorkflowError};
use ruleflow::{
    CancelToken, Config, DataRecord, ExecuteOptions, MemoryRepository, Operator, Rule,
    RuleService, Value,
};
use std::collections::HashMap;
use std::sync::Arc;

fn service() -> RuleService {
    let repo = Arc::new(MemoryRepository::new());
    let mut patterns = HashMap::new();
    patterns.insert("Y".to_string(), "Approved".to_string());
    repo.seed(
        vec![
            Rule::simple("R1", "threshold", "issue", Operator::GreaterThan, Value::Int(30))
                .with_score(20.0, 30.0),
        ],
        vec![],
        patterns,
    );
    let service = RuleService::new(Config::default(), repo);
    service.reload().unwrap();
    service
}

#[test]
fn test_builtin_evaluate_stage() {
    let service = service();
    let result = service
        .execute_workflow(
            "score",
            &["evaluate".to_string()],
            &serde_json::json!({"issue": 35}),
        )
        .unwrap();

    assert_eq!(result.process_name, "score");
    assert_eq!(
        result.data.get("total_points"),
        Some(&serde_json::json!(600.0))
    );
    assert_eq!(
        result.data.get("action_recommendation"),
        Some(&serde_json::json!("Approved"))
    );
    assert_eq!(result.stages.len(), 1);
}

#[test]
fn test_unknown_stage_surfaces() {
    let service = service();
    let err = service
        .execute_workflow(
            "bad",
            &["evaluate".to_string(), "fulfil".to_string()],
            &serde_json::json!({"issue": 35}),
        )
        .unwrap_err();
    assert_eq!(err.kind(), "WorkflowStageUnknown");
}

#[test]
fn test_custom_factory_stages_chain_in_order() {
    struct AppendStage(&'static str);
    impl StageHandler for AppendStage {
        fn handle(
            &self,
            mut data: DataRecord,
        ) -> Result<DataRecord, WorkflowError> {
            let trail = data
                .get("trail")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            data.insert("trail", Value::Str(format!("{}{}", trail, self.0)));
            Ok(data)
        }
    }

    let factory = MapHandlerFactory::new()
        .register("first", Arc::new(AppendStage("a")))
        .register("second", Arc::new(AppendStage("b")))
        .register("third", Arc::new(AppendStage("c")));
    let service = service().with_workflow_factory(Arc::new(factory));

    let result = service
        .execute_workflow(
            "trail",
            &["first".to_string(), "second".to_string(), "third".to_string()],
            &serde_json::json!({}),
        )
        .unwrap();
    assert_eq!(result.data.get("trail"), Some(&serde_json::json!("abc")));
}

#[test]
fn test_workflows_are_reentrant_across_threads() {
    let service = Arc::new(service());
    let mut handles = Vec::new();
    for i in 0..8 {
        let service = Arc::clone(&service);
        handles.push(std::thread::spawn(move || {
            service
                .execute_workflow(
                    "concurrent",
                    &["evaluate".to_string()],
                    &serde_json::json!({"issue": 31 + i}),
                )
                .unwrap()
        }));
    }
    for handle in handles {
        let result = handle.join().unwrap();
        assert_eq!(
            result.data.get("pattern_result"),
            Some(&serde_json::json!("Y"))
        );
    }
}

#[test]
fn test_workflow_leaves_execution_log_untouched() {
    let service = service();
    service
        .execute_workflow("score", &["evaluate".to_string()], &serde_json::json!({"issue": 35}))
        .unwrap();
    service.flush_logs();
    // The workflow's evaluate stage is diagnostic; only execute() appends.
    assert!(service.repository().executions(10).unwrap().is_empty());

    service
        .execute(
            &serde_json::json!({"issue": 35}),
            &ExecuteOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
    service.flush_logs();
    assert_eq!(service.repository().executions(10).unwrap().len(), 1);
}
