//! # Repository Layer
//!
//! The minimal persistence contract the core consumes: read the rule set,
//! patterns and conditions, mutate catalog entries, and append execution
//! logs, rule versions, A/B tests and assignments.
//!
//! Backends are selectable at startup:
//! - [`FileRepository`] reads and writes the rule-set JSON file format on
//!   disk and keeps logs/versions/tests under a data directory.
//! - [`MemoryRepository`] holds everything in process; used by tests and
//!   embedders.
//!
//! Object-store and relational backends live outside this crate; they
//! implement the same trait.

pub mod file;
pub mod memory;

pub use file::FileRepository;
pub use memory::MemoryRepository;

use crate::abtest::{AbTest, Variant, VariantCounters};
use crate::execlog::ExecutionRecord;
use crate::model::{Condition, Rule};
use crate::versioning::RuleVersion;
use std::collections::HashMap;
use std::io;
use thiserror::Error;

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Write conflicts with existing state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend-specific failure
    #[error("{0}")]
    Backend(String),
}

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Persistence contract consumed by the registry, the log sink, the
/// version store and the A/B engine.
pub trait Repository: Send + Sync {
    /// All persisted rules.
    fn read_rules_set(&self) -> RepositoryResult<Vec<Rule>>;

    /// The pattern table: pattern string → recommendation.
    fn read_patterns(&self) -> RepositoryResult<HashMap<String, String>>;

    /// All reusable conditions.
    fn read_conditions_set(&self) -> RepositoryResult<Vec<Condition>>;

    /// Cheap change-detection token over the catalog.
    ///
    /// The reload monitor compares tokens between polls; any catalog
    /// mutation must change the token.
    fn freshness_token(&self) -> RepositoryResult<u64>;

    /// Insert or replace a rule.
    fn upsert_rule(&self, rule: &Rule) -> RepositoryResult<()>;

    /// Delete a rule; returns whether it existed.
    fn delete_rule(&self, rule_id: &str) -> RepositoryResult<bool>;

    /// Insert or replace a condition.
    fn upsert_condition(&self, condition: &Condition) -> RepositoryResult<()>;

    /// Delete a condition; returns whether it existed.
    fn delete_condition(&self, condition_id: &str) -> RepositoryResult<bool>;

    /// Insert or replace a pattern mapping.
    fn upsert_pattern(&self, pattern: &str, recommendation: &str) -> RepositoryResult<()>;

    /// Delete a pattern mapping; returns whether it existed.
    fn delete_pattern(&self, pattern: &str) -> RepositoryResult<bool>;

    /// Append one execution record.
    fn append_execution(&self, record: &ExecutionRecord) -> RepositoryResult<()>;

    /// Most recent executions, newest first, up to `limit`.
    fn executions(&self, limit: usize) -> RepositoryResult<Vec<ExecutionRecord>>;

    /// Insert a version row; when it is current, the prior current row for
    /// the same rule is flipped off.
    fn insert_version(&self, version: &RuleVersion) -> RepositoryResult<()>;

    /// All version rows for a rule, unordered.
    fn versions(&self, rule_id: &str) -> RepositoryResult<Vec<RuleVersion>>;

    /// One version row.
    fn version(&self, rule_id: &str, version_number: u64)
        -> RepositoryResult<Option<RuleVersion>>;

    /// The current version row for a rule.
    fn current_version(&self, rule_id: &str) -> RepositoryResult<Option<RuleVersion>>;

    /// Insert a new A/B test; fails on duplicate id.
    fn insert_ab_test(&self, test: &AbTest) -> RepositoryResult<()>;

    /// Replace an existing A/B test.
    fn update_ab_test(&self, test: &AbTest) -> RepositoryResult<()>;

    /// Fetch one A/B test.
    fn ab_test(&self, test_id: &str) -> RepositoryResult<Option<AbTest>>;

    /// All A/B tests.
    fn ab_tests(&self) -> RepositoryResult<Vec<AbTest>>;

    /// Persist the first assignment for a key and return whichever
    /// assignment is now persisted (first write wins).
    fn upsert_assignment(
        &self,
        test_id: &str,
        assignment_key: &str,
        variant: Variant,
    ) -> RepositoryResult<Variant>;

    /// The persisted assignment for a key, if any.
    fn assignment(&self, test_id: &str, assignment_key: &str)
        -> RepositoryResult<Option<Variant>>;

    /// Update a variant's execution counters in place.
    fn record_outcome(&self, test_id: &str, variant: Variant, success: bool)
        -> RepositoryResult<()>;

    /// Current `(variant A, variant B)` counters for a test.
    fn counters(&self, test_id: &str) -> RepositoryResult<(VariantCounters, VariantCounters)>;
}

/// Freshness token over catalog content: CRC32 of every rule id, version
/// and update timestamp plus the condition ids.
///
/// Shared by backends that hold the catalog in a structured form.
pub fn compute_freshness(rules: &[Rule], conditions: &[Condition]) -> u64 {
    let mut hasher = crc32fast::Hasher::new();

    let mut rule_keys: Vec<String> = rules
        .iter()
        .map(|r| {
            format!(
                "{}:{}:{}",
                r.rule_id,
                r.version,
                r.updated_at.map(|t| t.timestamp_micros()).unwrap_or(0)
            )
        })
        .collect();
    rule_keys.sort();
    for key in &rule_keys {
        hasher.update(key.as_bytes());
    }

    let mut condition_keys: Vec<&str> =
        conditions.iter().map(|c| c.condition_id.as_str()).collect();
    condition_keys.sort_unstable();
    for key in &condition_keys {
        hasher.update(key.as_bytes());
    }

    u64::from(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operator;
    use crate::value::Value;

    #[test]
    fn test_freshness_changes_with_catalog() {
        let rule = Rule::simple("R1", "r", "x", Operator::Equal, Value::Int(1));
        let base = compute_freshness(&[rule.clone()], &[]);

        let mut bumped = rule.clone();
        bumped.version = 2;
        assert_ne!(base, compute_freshness(&[bumped], &[]));

        let condition = Condition {
            condition_id: "C1".into(),
            attribute: "x".into(),
            operator: Operator::Equal,
            constant: Value::Int(1),
        };
        assert_ne!(base, compute_freshness(&[rule], &[condition]));
    }

    #[test]
    fn test_freshness_is_order_independent() {
        let a = Rule::simple("A", "a", "x", Operator::Equal, Value::Int(1));
        let b = Rule::simple("B", "b", "y", Operator::Equal, Value::Int(2));
        assert_eq!(
            compute_freshness(&[a.clone(), b.clone()], &[]),
            compute_freshness(&[b, a], &[])
        );
    }
}
