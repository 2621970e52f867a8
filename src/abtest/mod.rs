//! # A/B Testing Engine
//!
//! Immutable rule-version experiments with deterministic, stable traffic
//! assignment. The bucket for a key is a pure function of
//! `(test_id, assignment_key)`, so concurrent first-writes converge on the
//! same variant; assignments are persisted first-write-wins and reused for
//! the test's lifetime.
//!
//! ## Assignment
//!
//! `h = sha256(test_id || assignment_key)` truncated to 64 bits, reduced
//! `mod 10000`; the key lands in variant A when `h / 10000 < split_a`.

pub mod stats;

use crate::repository::{Repository, RepositoryError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

/// Number of assignment buckets.
const BUCKETS: u64 = 10_000;

/// A/B engine errors.
#[derive(Debug, Error)]
pub enum AbTestError {
    /// Unknown test id
    #[error("A/B test '{0}' not found")]
    NotFound(String),

    /// Operation not valid in the test's current status
    #[error("A/B test '{test_id}' is {actual}, expected {expected}")]
    InvalidState {
        /// Test id
        test_id: String,
        /// Status the operation requires
        expected: AbTestStatus,
        /// Status the test is in
        actual: AbTestStatus,
    },

    /// Malformed test definition
    #[error("invalid A/B test definition: {0}")]
    InvalidDefinition(String),

    /// Underlying storage failure
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result alias for A/B operations.
pub type AbTestResult<T> = Result<T, AbTestError>;

/// Experiment variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    /// Control
    A,
    /// Treatment
    B,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::A => f.write_str("A"),
            Variant::B => f.write_str("B"),
        }
    }
}

/// Lifecycle of an A/B test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbTestStatus {
    /// Defined but not assigning traffic
    Draft,
    /// Actively assigning traffic
    Running,
    /// Finished; assignments frozen
    Completed,
}

impl std::fmt::Display for AbTestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbTestStatus::Draft => f.write_str("draft"),
            AbTestStatus::Running => f.write_str("running"),
            AbTestStatus::Completed => f.write_str("completed"),
        }
    }
}

/// An A/B test over two versions of one rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    /// Unique test id
    pub test_id: String,
    /// Rule under experiment
    pub rule_id: String,
    /// Version string served to variant A (control)
    pub variant_a: String,
    /// Version string served to variant B (treatment)
    pub variant_b: String,
    /// Fraction of traffic assigned to A
    pub split_a: f64,
    /// Fraction of traffic assigned to B
    pub split_b: f64,
    /// Lifecycle status
    pub status: AbTestStatus,
    /// When the test started running
    pub started_at: Option<DateTime<Utc>>,
    /// When the test completed
    pub ended_at: Option<DateTime<Utc>>,
    /// Minimum assignments per variant before significance is meaningful
    pub min_sample_size: u64,
    /// Confidence level for significance, e.g. 0.95
    pub confidence_level: f64,
    /// Declared winner once completed
    pub winning_variant: Option<Variant>,
}

/// Per-variant execution counters, updated in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCounters {
    /// Keys assigned to this variant
    pub assignments: u64,
    /// Executions that succeeded
    pub successes: u64,
    /// Executions that failed
    pub failures: u64,
}

/// Metrics report for a test.
#[derive(Debug, Clone, Serialize)]
pub struct AbTestMetrics {
    /// Test id
    pub test_id: String,
    /// Lifecycle status
    pub status: AbTestStatus,
    /// Control counters
    pub variant_a: VariantCounters,
    /// Treatment counters
    pub variant_b: VariantCounters,
    /// Whether both variants reached `min_sample_size` assignments
    pub sample_size_met: bool,
    /// Chi-square statistic, when defined
    pub chi_square: Option<f64>,
    /// p-value, when defined
    pub p_value: Option<f64>,
    /// Whether the p-value crosses `1 - confidence_level`
    pub significant: Option<bool>,
}

/// Parameters for creating a test.
#[derive(Debug, Clone, Deserialize)]
pub struct AbTestSpec {
    /// Unique test id
    pub test_id: String,
    /// Rule under experiment
    pub rule_id: String,
    /// Control version
    pub variant_a: String,
    /// Treatment version
    pub variant_b: String,
    /// Traffic fraction for A (B gets the remainder)
    pub split_a: f64,
    /// Minimum per-variant sample size
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,
    /// Significance confidence level
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
}

fn default_min_sample_size() -> u64 {
    100
}

fn default_confidence_level() -> f64 {
    0.95
}

/// The A/B testing engine.
///
/// Assignment reads go through an in-process cache; the repository stays
/// the source of truth and its upsert-on-key keeps concurrent first
/// writes convergent.
pub struct AbTestEngine {
    repository: Arc<dyn Repository>,
    assignment_cache: DashMap<(String, String), Variant>,
}

impl AbTestEngine {
    /// Create an engine backed by the given repository.
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        AbTestEngine {
            repository,
            assignment_cache: DashMap::new(),
        }
    }

    /// Create a test in `draft` status.
    pub fn create_test(&self, spec: AbTestSpec) -> AbTestResult<AbTest> {
        if !(spec.split_a > 0.0 && spec.split_a < 1.0) {
            return Err(AbTestError::InvalidDefinition(format!(
                "split_a must be inside (0, 1), got {}",
                spec.split_a
            )));
        }
        if !(spec.confidence_level > 0.0 && spec.confidence_level < 1.0) {
            return Err(AbTestError::InvalidDefinition(format!(
                "confidence_level must be inside (0, 1), got {}",
                spec.confidence_level
            )));
        }
        if self.repository.ab_test(&spec.test_id)?.is_some() {
            return Err(AbTestError::InvalidDefinition(format!(
                "A/B test '{}' already exists",
                spec.test_id
            )));
        }

        let test = AbTest {
            test_id: spec.test_id,
            rule_id: spec.rule_id,
            variant_a: spec.variant_a,
            variant_b: spec.variant_b,
            split_a: spec.split_a,
            split_b: 1.0 - spec.split_a,
            status: AbTestStatus::Draft,
            started_at: None,
            ended_at: None,
            min_sample_size: spec.min_sample_size,
            confidence_level: spec.confidence_level,
            winning_variant: None,
        };
        self.repository.insert_ab_test(&test)?;
        Ok(test)
    }

    /// Move a draft test to `running`.
    pub fn start_test(&self, test_id: &str) -> AbTestResult<AbTest> {
        let mut test = self.get(test_id)?;
        if test.status != AbTestStatus::Draft {
            return Err(AbTestError::InvalidState {
                test_id: test_id.to_string(),
                expected: AbTestStatus::Draft,
                actual: test.status,
            });
        }
        test.status = AbTestStatus::Running;
        test.started_at = Some(Utc::now());
        self.repository.update_ab_test(&test)?;
        Ok(test)
    }

    /// Complete a running test, optionally declaring a winner.
    pub fn stop_test(&self, test_id: &str, winner: Option<Variant>) -> AbTestResult<AbTest> {
        let mut test = self.get(test_id)?;
        if test.status != AbTestStatus::Running {
            return Err(AbTestError::InvalidState {
                test_id: test_id.to_string(),
                expected: AbTestStatus::Running,
                actual: test.status,
            });
        }
        test.status = AbTestStatus::Completed;
        test.ended_at = Some(Utc::now());
        test.winning_variant = winner;
        self.repository.update_ab_test(&test)?;
        Ok(test)
    }

    /// Fetch a test.
    pub fn get(&self, test_id: &str) -> AbTestResult<AbTest> {
        self.repository
            .ab_test(test_id)?
            .ok_or_else(|| AbTestError::NotFound(test_id.to_string()))
    }

    /// All tests.
    pub fn list(&self) -> AbTestResult<Vec<AbTest>> {
        Ok(self.repository.ab_tests()?)
    }

    /// Assign a key to a variant.
    ///
    /// Returns `None` unless the test is running. The first assignment for
    /// a key is persisted; later calls return the persisted variant, so a
    /// key's variant is stable for the test's lifetime.
    pub fn assign(&self, test_id: &str, assignment_key: &str) -> AbTestResult<Option<Variant>> {
        let test = self.get(test_id)?;
        if test.status != AbTestStatus::Running {
            return Ok(None);
        }

        let cache_key = (test_id.to_string(), assignment_key.to_string());
        if let Some(existing) = self.assignment_cache.get(&cache_key) {
            return Ok(Some(*existing));
        }

        let computed = bucket_variant(test_id, assignment_key, test.split_a);
        // Upsert-on-key: the repository keeps whichever first write landed.
        let persisted = self
            .repository
            .upsert_assignment(test_id, assignment_key, computed)?;
        self.assignment_cache.insert(cache_key, persisted);
        Ok(Some(persisted))
    }

    /// Look up the variant a key would receive, without persisting.
    ///
    /// Prefers an already-persisted assignment and otherwise computes the
    /// deterministic bucket. Dry runs use this path so they never write
    /// an assignment or touch the assignment counters; the bucket is a
    /// pure function of `(test_id, key)`, so a later real assignment
    /// converges on the same variant.
    pub fn peek(&self, test_id: &str, assignment_key: &str) -> AbTestResult<Option<Variant>> {
        let test = self.get(test_id)?;
        if test.status != AbTestStatus::Running {
            return Ok(None);
        }

        let cache_key = (test_id.to_string(), assignment_key.to_string());
        if let Some(existing) = self.assignment_cache.get(&cache_key) {
            return Ok(Some(*existing));
        }
        if let Some(persisted) = self.repository.assignment(test_id, assignment_key)? {
            return Ok(Some(persisted));
        }
        Ok(Some(bucket_variant(test_id, assignment_key, test.split_a)))
    }

    /// Record one execution outcome for a variant (in-place counters).
    pub fn record_execution(
        &self,
        test_id: &str,
        variant: Variant,
        success: bool,
    ) -> AbTestResult<()> {
        self.repository.record_outcome(test_id, variant, success)?;
        Ok(())
    }

    /// Compute the test's metrics report.
    pub fn metrics(&self, test_id: &str) -> AbTestResult<AbTestMetrics> {
        let test = self.get(test_id)?;
        let (a, b) = self.repository.counters(test_id)?;

        let sample_size_met =
            a.assignments >= test.min_sample_size && b.assignments >= test.min_sample_size;
        let chi = stats::chi_square_2x2(a.successes, a.failures, b.successes, b.failures);
        let alpha = 1.0 - test.confidence_level;

        Ok(AbTestMetrics {
            test_id: test.test_id,
            status: test.status,
            variant_a: a,
            variant_b: b,
            sample_size_met,
            chi_square: chi.map(|c| c.statistic),
            p_value: chi.map(|c| c.p_value),
            significant: chi.map(|c| c.p_value < alpha),
        })
    }
}

/// Deterministic bucket for `(test_id, assignment_key)`.
pub fn bucket_variant(test_id: &str, assignment_key: &str, split_a: f64) -> Variant {
    let mut hasher = Sha256::new();
    hasher.update(test_id.as_bytes());
    hasher.update(assignment_key.as_bytes());
    let digest = hasher.finalize();
    let h = digest
        .iter()
        .take(8)
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte));
    let bucket = h % BUCKETS;
    if (bucket as f64) / (BUCKETS as f64) < split_a {
        Variant::A
    } else {
        Variant::B
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;

    fn engine() -> AbTestEngine {
        AbTestEngine::new(Arc::new(MemoryRepository::new()))
    }

    fn spec(test_id: &str) -> AbTestSpec {
        AbTestSpec {
            test_id: test_id.to_string(),
            rule_id: "R1".to_string(),
            variant_a: "1".to_string(),
            variant_b: "2".to_string(),
            split_a: 0.5,
            min_sample_size: 10,
            confidence_level: 0.95,
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let engine = engine();
        let test = engine.create_test(spec("T1")).unwrap();
        assert_eq!(test.status, AbTestStatus::Draft);
        assert!((test.split_b - 0.5).abs() < 1e-12);

        let test = engine.start_test("T1").unwrap();
        assert_eq!(test.status, AbTestStatus::Running);
        assert!(test.started_at.is_some());

        let test = engine.stop_test("T1", Some(Variant::B)).unwrap();
        assert_eq!(test.status, AbTestStatus::Completed);
        assert_eq!(test.winning_variant, Some(Variant::B));

        // Completed tests cannot be stopped again.
        assert!(matches!(
            engine.stop_test("T1", None),
            Err(AbTestError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_invalid_split_rejected() {
        let engine = engine();
        let mut bad = spec("T1");
        bad.split_a = 1.0;
        assert!(matches!(
            engine.create_test(bad),
            Err(AbTestError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_draft_and_completed_do_not_assign() {
        let engine = engine();
        engine.create_test(spec("T1")).unwrap();
        assert_eq!(engine.assign("T1", "user-1").unwrap(), None);

        engine.start_test("T1").unwrap();
        assert!(engine.assign("T1", "user-1").unwrap().is_some());

        engine.stop_test("T1", None).unwrap();
        assert_eq!(engine.assign("T1", "user-2").unwrap(), None);
    }

    #[test]
    fn test_assignment_is_stable() {
        let engine = engine();
        engine.create_test(spec("T1")).unwrap();
        engine.start_test("T1").unwrap();

        for key_index in 0..50 {
            let key = format!("k{}", key_index);
            let first = engine.assign("T1", &key).unwrap().unwrap();
            for _ in 0..10 {
                assert_eq!(engine.assign("T1", &key).unwrap(), Some(first));
            }
        }
    }

    #[test]
    fn test_peek_does_not_persist() {
        let engine = engine();
        engine.create_test(spec("T1")).unwrap();
        assert_eq!(engine.peek("T1", "user-1").unwrap(), None);

        engine.start_test("T1").unwrap();
        let peeked = engine.peek("T1", "user-1").unwrap().unwrap();

        // Nothing was written: no assignment counters moved.
        let metrics = engine.metrics("T1").unwrap();
        assert_eq!(
            metrics.variant_a.assignments + metrics.variant_b.assignments,
            0
        );

        // A later real assignment converges on the peeked variant.
        assert_eq!(engine.assign("T1", "user-1").unwrap(), Some(peeked));
        let metrics = engine.metrics("T1").unwrap();
        assert_eq!(
            metrics.variant_a.assignments + metrics.variant_b.assignments,
            1
        );
    }

    #[test]
    fn test_peek_returns_persisted_assignment() {
        let engine = engine();
        engine.create_test(spec("T1")).unwrap();
        engine.start_test("T1").unwrap();

        let assigned = engine.assign("T1", "user-1").unwrap().unwrap();
        assert_eq!(engine.peek("T1", "user-1").unwrap(), Some(assigned));
    }

    #[test]
    fn test_bucket_is_pure() {
        for key in ["a", "b", "correlation-123", ""] {
            assert_eq!(
                bucket_variant("T1", key, 0.5),
                bucket_variant("T1", key, 0.5)
            );
        }
        // Different tests hash the same key independently.
        let spread: Vec<Variant> = (0..64)
            .map(|i| bucket_variant(&format!("test-{}", i), "same-key", 0.5))
            .collect();
        assert!(spread.contains(&Variant::A));
        assert!(spread.contains(&Variant::B));
    }

    #[test]
    fn test_split_distribution_roughly_balanced() {
        let assigned_a = (0..10_000)
            .filter(|i| bucket_variant("T1", &format!("k{}", i), 0.5) == Variant::A)
            .count();
        // 40-60% tolerance over 10^4 keys.
        assert!((4000..=6000).contains(&assigned_a), "got {}", assigned_a);
    }

    #[test]
    fn test_metrics_and_significance() {
        let engine = engine();
        engine.create_test(spec("T1")).unwrap();
        engine.start_test("T1").unwrap();

        for i in 0..20 {
            engine.assign("T1", &format!("k{}", i)).unwrap();
        }
        for _ in 0..90 {
            engine.record_execution("T1", Variant::A, true).unwrap();
        }
        for _ in 0..10 {
            engine.record_execution("T1", Variant::A, false).unwrap();
        }
        for _ in 0..50 {
            engine.record_execution("T1", Variant::B, true).unwrap();
            engine.record_execution("T1", Variant::B, false).unwrap();
        }

        let metrics = engine.metrics("T1").unwrap();
        assert_eq!(metrics.variant_a.successes, 90);
        assert_eq!(metrics.variant_b.failures, 50);
        assert!(metrics.sample_size_met);
        assert_eq!(metrics.significant, Some(true));
        assert!(metrics.p_value.unwrap() < 0.05);
    }
}
