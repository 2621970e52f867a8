//! Hot-Reload Tests
//!
//! Covers Scenario C and the registry's generation semantics through the
//! file backend:
//! - Reload picks up externally edited catalogs
//! - Subscribers receive one `rules_reloaded` event per reload
//! - Transactional reload keeps the old snapshot on validation failure
//! - In-flight evaluations complete against their pinned generation
//! - Background monitor start/stop and the freshness token

use ruleflow::{
    BackendKind, CancelToken, ChangeEvent, Config, ExecuteOptions, Operator, Rule, RuleService,
    RulesFile, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn rule(id: &str, priority: i64) -> Rule {
    Rule::simple(id, format!("rule {}", id), "n", Operator::GreaterThanOrEqual, Value::Int(0))
        .with_priority(priority)
        .with_score(10.0, 1.0)
}

fn write_catalog(path: &std::path::Path, rules: Vec<Rule>) {
    let file = RulesFile {
        rules_set: rules,
        patterns: HashMap::new(),
    };
    std::fs::write(path, serde_json::to_string_pretty(&file).unwrap()).unwrap();
}

fn file_service(tmp: &TempDir) -> RuleService {
    let mut config = Config::default();
    config.storage.backend = BackendKind::File;
    config.storage.rules_config_path = tmp.path().join("rules.json");
    config.storage.data_dir = tmp.path().join("data");
    config.registry.monitor_interval_secs = 0;
    RuleService::from_config(config).unwrap()
}

// ============================================================================
// Scenario C: hot reload
// ============================================================================

#[test]
fn test_scenario_c_reload_grows_pattern() {
    let tmp = TempDir::new().unwrap();
    write_catalog(&tmp.path().join("rules.json"), vec![rule("R1", 1)]);
    let service = file_service(&tmp);

    let subscription = service.subscribe();

    let before = service
        .execute(
            &serde_json::json!({"n": 1}),
            &ExecuteOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(before.pattern_result.len(), 1);

    // Repository updated out-of-band to v2 with two rules.
    write_catalog(
        &tmp.path().join("rules.json"),
        vec![rule("R1", 1), rule("R2", 2)],
    );
    let version = service.reload().unwrap();

    // Exactly one rules_reloaded event for the swap.
    assert_eq!(
        subscription.recv_timeout(Duration::from_secs(1)),
        Some(ChangeEvent::RulesReloaded {
            version,
            rule_count: 2
        })
    );
    assert!(subscription.try_recv().is_none());

    let after = service
        .execute(
            &serde_json::json!({"n": 1}),
            &ExecuteOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(after.pattern_result.len(), 2);
}

#[test]
fn test_in_flight_snapshot_survives_swap() {
    let tmp = TempDir::new().unwrap();
    write_catalog(&tmp.path().join("rules.json"), vec![rule("R1", 1)]);
    let service = file_service(&tmp);

    // An "in-flight" request pins the generation before the swap.
    let pinned = service.registry().snapshot();
    assert_eq!(pinned.rule_count(), 1);

    write_catalog(
        &tmp.path().join("rules.json"),
        vec![rule("R1", 1), rule("R2", 2)],
    );
    service.reload().unwrap();

    // The pinned generation still evaluates one rule.
    let view = pinned.ruleset_view(None);
    let out = ruleflow::pipeline::execute(
        &view,
        &ruleflow::DataRecord::from_json(&serde_json::json!({"n": 1})).unwrap(),
        false,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(out.pattern_result.len(), 1);

    // New requests see two rules.
    assert_eq!(service.registry().snapshot().rule_count(), 2);
}

// ============================================================================
// Transactional reload
// ============================================================================

#[test]
fn test_bad_catalog_is_rejected_and_old_snapshot_serves() {
    let tmp = TempDir::new().unwrap();
    write_catalog(&tmp.path().join("rules.json"), vec![rule("R1", 1)]);
    let service = file_service(&tmp);
    let subscription = service.subscribe();

    // Duplicate rule ids make the snapshot invalid.
    write_catalog(
        &tmp.path().join("rules.json"),
        vec![rule("R1", 1), rule("R1", 2)],
    );
    assert!(service.reload().is_err());

    assert!(matches!(
        subscription.recv_timeout(Duration::from_secs(1)),
        Some(ChangeEvent::ReloadFailed { .. })
    ));

    // Old snapshot still serves.
    let result = service
        .execute(
            &serde_json::json!({"n": 1}),
            &ExecuteOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(result.pattern_result, "Y");

    let status = service.status();
    assert!(status.registry.last_reload_status.starts_with("failed:"));
}

#[test]
fn test_pattern_key_containing_no_match_tag_rejected_at_reload() {
    let tmp = TempDir::new().unwrap();
    let mut patterns = HashMap::new();
    patterns.insert("Y-".to_string(), "Ambiguous".to_string());
    let file = RulesFile {
        rules_set: vec![rule("R1", 1), rule("R2", 2)],
        patterns,
    };
    std::fs::write(
        tmp.path().join("rules.json"),
        serde_json::to_string_pretty(&file).unwrap(),
    )
    .unwrap();

    let mut config = Config::default();
    config.storage.backend = BackendKind::File;
    config.storage.rules_config_path = tmp.path().join("rules.json");
    config.storage.data_dir = tmp.path().join("data");
    assert!(RuleService::from_config(config).is_err());
}

// ============================================================================
// Monitor
// ============================================================================

#[test]
fn test_monitor_picks_up_file_edits() {
    let tmp = TempDir::new().unwrap();
    write_catalog(&tmp.path().join("rules.json"), vec![rule("R1", 1)]);

    let mut config = Config::default();
    config.storage.backend = BackendKind::File;
    config.storage.rules_config_path = tmp.path().join("rules.json");
    config.storage.data_dir = tmp.path().join("data");
    config.registry.monitor_interval_secs = 1;
    let service = Arc::new(RuleService::from_config(config).unwrap());

    assert!(service.start_monitoring());
    assert!(!service.start_monitoring(), "second start is a no-op");
    assert!(service.status().registry.monitoring_active);

    write_catalog(
        &tmp.path().join("rules.json"),
        vec![rule("R1", 1), rule("R2", 2)],
    );

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while service.registry().snapshot().rule_count() < 2
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(service.registry().snapshot().rule_count(), 2);

    assert!(service.stop_monitoring());
    assert!(!service.status().registry.monitoring_active);
}

// ============================================================================
// Concurrency: readers never observe a half-installed generation
// ============================================================================

#[test]
fn test_concurrent_reads_during_reloads_see_whole_generations() {
    let tmp = TempDir::new().unwrap();
    write_catalog(&tmp.path().join("rules.json"), vec![rule("R1", 1)]);
    let service = Arc::new(file_service(&tmp));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let service = Arc::clone(&service);
        readers.push(std::thread::spawn(move || {
            for _ in 0..200 {
                let result = service
                    .execute(
                        &serde_json::json!({"n": 1}),
                        &ExecuteOptions {
                            dry_run: true,
                            ..Default::default()
                        },
                        &CancelToken::new(),
                    )
                    .unwrap();
                // Whole generations only: one rule or three, never two.
                assert!(
                    result.pattern_result.len() == 1 || result.pattern_result.len() == 3,
                    "saw a torn generation: {}",
                    result.pattern_result
                );
            }
        }));
    }

    for _ in 0..10 {
        write_catalog(
            &tmp.path().join("rules.json"),
            vec![rule("R1", 1), rule("R2", 2), rule("R3", 3)],
        );
        service.reload().unwrap();
        write_catalog(&tmp.path().join("rules.json"), vec![rule("R1", 1)]);
        service.reload().unwrap();
    }

    for reader in readers {
        reader.join().unwrap();
    }
}
