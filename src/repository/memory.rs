//! In-Memory Repository
//!
//! Process-local backend used by tests and embedders. Catalog state sits
//! behind a read/write lock; A/B assignments use a concurrent map whose
//! entry API gives the upsert-on-key first-write-wins guarantee without a
//! global lock.

use super::{compute_freshness, Repository, RepositoryError, RepositoryResult};
use crate::abtest::{AbTest, Variant, VariantCounters};
use crate::execlog::ExecutionRecord;
use crate::model::{Condition, Rule};
use crate::versioning::RuleVersion;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct MemoryState {
    rules: BTreeMap<String, Rule>,
    conditions: BTreeMap<String, Condition>,
    patterns: HashMap<String, String>,
    executions: Vec<ExecutionRecord>,
    versions: HashMap<String, Vec<RuleVersion>>,
    tests: HashMap<String, AbTest>,
    counters: HashMap<String, (VariantCounters, VariantCounters)>,
}

/// In-memory implementation of [`Repository`].
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
    assignments: DashMap<(String, String), Variant>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        MemoryRepository::default()
    }

    /// Seed the catalog in one shot (tests, embedding).
    pub fn seed(
        &self,
        rules: Vec<Rule>,
        conditions: Vec<Condition>,
        patterns: HashMap<String, String>,
    ) {
        let mut state = self.state.write();
        state.rules = rules.into_iter().map(|r| (r.rule_id.clone(), r)).collect();
        state.conditions = conditions
            .into_iter()
            .map(|c| (c.condition_id.clone(), c))
            .collect();
        state.patterns = patterns;
    }
}

impl Repository for MemoryRepository {
    fn read_rules_set(&self) -> RepositoryResult<Vec<Rule>> {
        Ok(self.state.read().rules.values().cloned().collect())
    }

    fn read_patterns(&self) -> RepositoryResult<HashMap<String, String>> {
        Ok(self.state.read().patterns.clone())
    }

    fn read_conditions_set(&self) -> RepositoryResult<Vec<Condition>> {
        Ok(self.state.read().conditions.values().cloned().collect())
    }

    fn freshness_token(&self) -> RepositoryResult<u64> {
        let state = self.state.read();
        let rules: Vec<Rule> = state.rules.values().cloned().collect();
        let conditions: Vec<Condition> = state.conditions.values().cloned().collect();
        Ok(compute_freshness(&rules, &conditions))
    }

    fn upsert_rule(&self, rule: &Rule) -> RepositoryResult<()> {
        self.state
            .write()
            .rules
            .insert(rule.rule_id.clone(), rule.clone());
        Ok(())
    }

    fn delete_rule(&self, rule_id: &str) -> RepositoryResult<bool> {
        Ok(self.state.write().rules.remove(rule_id).is_some())
    }

    fn upsert_condition(&self, condition: &Condition) -> RepositoryResult<()> {
        self.state
            .write()
            .conditions
            .insert(condition.condition_id.clone(), condition.clone());
        Ok(())
    }

    fn delete_condition(&self, condition_id: &str) -> RepositoryResult<bool> {
        Ok(self.state.write().conditions.remove(condition_id).is_some())
    }

    fn upsert_pattern(&self, pattern: &str, recommendation: &str) -> RepositoryResult<()> {
        self.state
            .write()
            .patterns
            .insert(pattern.to_string(), recommendation.to_string());
        Ok(())
    }

    fn delete_pattern(&self, pattern: &str) -> RepositoryResult<bool> {
        Ok(self.state.write().patterns.remove(pattern).is_some())
    }

    fn append_execution(&self, record: &ExecutionRecord) -> RepositoryResult<()> {
        self.state.write().executions.push(record.clone());
        Ok(())
    }

    fn executions(&self, limit: usize) -> RepositoryResult<Vec<ExecutionRecord>> {
        let state = self.state.read();
        Ok(state.executions.iter().rev().take(limit).cloned().collect())
    }

    fn insert_version(&self, version: &RuleVersion) -> RepositoryResult<()> {
        let mut state = self.state.write();
        let rows = state.versions.entry(version.rule_id.clone()).or_default();
        if rows
            .iter()
            .any(|v| v.version_number == version.version_number)
        {
            return Err(RepositoryError::Conflict(format!(
                "version {} already exists for rule '{}'",
                version.version_number, version.rule_id
            )));
        }
        if version.is_current {
            for row in rows.iter_mut() {
                row.is_current = false;
            }
        }
        rows.push(version.clone());
        Ok(())
    }

    fn versions(&self, rule_id: &str) -> RepositoryResult<Vec<RuleVersion>> {
        Ok(self
            .state
            .read()
            .versions
            .get(rule_id)
            .cloned()
            .unwrap_or_default())
    }

    fn version(
        &self,
        rule_id: &str,
        version_number: u64,
    ) -> RepositoryResult<Option<RuleVersion>> {
        Ok(self.state.read().versions.get(rule_id).and_then(|rows| {
            rows.iter()
                .find(|v| v.version_number == version_number)
                .cloned()
        }))
    }

    fn current_version(&self, rule_id: &str) -> RepositoryResult<Option<RuleVersion>> {
        Ok(self
            .state
            .read()
            .versions
            .get(rule_id)
            .and_then(|rows| rows.iter().find(|v| v.is_current).cloned()))
    }

    fn insert_ab_test(&self, test: &AbTest) -> RepositoryResult<()> {
        let mut state = self.state.write();
        if state.tests.contains_key(&test.test_id) {
            return Err(RepositoryError::Conflict(format!(
                "A/B test '{}' already exists",
                test.test_id
            )));
        }
        state.tests.insert(test.test_id.clone(), test.clone());
        Ok(())
    }

    fn update_ab_test(&self, test: &AbTest) -> RepositoryResult<()> {
        let mut state = self.state.write();
        if !state.tests.contains_key(&test.test_id) {
            return Err(RepositoryError::NotFound(format!(
                "A/B test '{}'",
                test.test_id
            )));
        }
        state.tests.insert(test.test_id.clone(), test.clone());
        Ok(())
    }

    fn ab_test(&self, test_id: &str) -> RepositoryResult<Option<AbTest>> {
        Ok(self.state.read().tests.get(test_id).cloned())
    }

    fn ab_tests(&self) -> RepositoryResult<Vec<AbTest>> {
        Ok(self.state.read().tests.values().cloned().collect())
    }

    fn upsert_assignment(
        &self,
        test_id: &str,
        assignment_key: &str,
        variant: Variant,
    ) -> RepositoryResult<Variant> {
        let key = (test_id.to_string(), assignment_key.to_string());
        match self.assignments.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Ok(*existing.get()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(variant);
                let mut state = self.state.write();
                let (a, b) = state.counters.entry(test_id.to_string()).or_default();
                match variant {
                    Variant::A => a.assignments += 1,
                    Variant::B => b.assignments += 1,
                }
                Ok(variant)
            }
        }
    }

    fn assignment(
        &self,
        test_id: &str,
        assignment_key: &str,
    ) -> RepositoryResult<Option<Variant>> {
        Ok(self
            .assignments
            .get(&(test_id.to_string(), assignment_key.to_string()))
            .map(|v| *v))
    }

    fn record_outcome(
        &self,
        test_id: &str,
        variant: Variant,
        success: bool,
    ) -> RepositoryResult<()> {
        let mut state = self.state.write();
        let (a, b) = state.counters.entry(test_id.to_string()).or_default();
        let counters = match variant {
            Variant::A => a,
            Variant::B => b,
        };
        if success {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
        Ok(())
    }

    fn counters(&self, test_id: &str) -> RepositoryResult<(VariantCounters, VariantCounters)> {
        Ok(self
            .state
            .read()
            .counters
            .get(test_id)
            .copied()
            .unwrap_or_default())
    }
}
