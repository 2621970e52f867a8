//! Immutable Registry Generations
//!
//! A [`RegistrySnapshot`] is one generation of the compiled catalog:
//! validated, ordered and ready to evaluate. Writers build a whole new
//! snapshot and publish it atomically; readers that obtained a generation
//! keep evaluating against it for their entire request, unaffected by
//! later swaps.
//!
//! Data is shared via `Arc`, so cloning a snapshot handle is O(1).

use crate::evaluator::CompiledRule;
use crate::model::{Condition, Rule};
use crate::pipeline::{CompiledRuleset, PipelineResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// One immutable generation of compiled rules.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Monotonic generation counter
    pub version: u64,
    /// When this generation was installed
    pub loaded_at: DateTime<Utc>,
    /// All compiled rules in evaluation order, with the pattern table
    ruleset: CompiledRuleset,
    /// Compiled rules by id
    by_id: HashMap<String, Arc<CompiledRule>>,
    /// Source definitions, kept for rebuilds and versioning
    raw_rules: HashMap<String, Rule>,
    /// Source conditions
    conditions: HashMap<String, Condition>,
}

impl RegistrySnapshot {
    /// Validate and compile a full catalog into a generation.
    ///
    /// This is the transactional gate for reloads: every rule must
    /// compile, ids must be unique and pattern keys must be well-formed,
    /// or the whole snapshot is rejected.
    pub fn build(
        version: u64,
        rules: Vec<Rule>,
        conditions: Vec<Condition>,
        patterns: HashMap<String, String>,
    ) -> PipelineResult<Self> {
        let condition_map: HashMap<String, Condition> = conditions
            .into_iter()
            .map(|c| (c.condition_id.clone(), c))
            .collect();

        let ruleset = CompiledRuleset::compile(None, &rules, &condition_map, patterns)?;
        let by_id = ruleset
            .rules
            .iter()
            .map(|r| (r.rule_id.clone(), Arc::clone(r)))
            .collect();
        let raw_rules = rules.into_iter().map(|r| (r.rule_id.clone(), r)).collect();

        Ok(RegistrySnapshot {
            version,
            loaded_at: Utc::now(),
            ruleset,
            by_id,
            raw_rules,
            conditions: condition_map,
        })
    }

    /// The empty generation installed at startup.
    pub fn empty() -> Self {
        RegistrySnapshot {
            version: 0,
            loaded_at: Utc::now(),
            ruleset: CompiledRuleset {
                ruleset_id: None,
                rules: Vec::new(),
                patterns: Arc::new(HashMap::new()),
                no_match_tag: crate::evaluator::NO_MATCH_TAG.to_string(),
            },
            by_id: HashMap::new(),
            raw_rules: HashMap::new(),
            conditions: HashMap::new(),
        }
    }

    /// O(1) lookup of a compiled rule.
    pub fn rule(&self, rule_id: &str) -> Option<Arc<CompiledRule>> {
        self.by_id.get(rule_id).cloned()
    }

    /// Compiled rules, optionally filtered to one ruleset, in evaluation
    /// order.
    pub fn rules(&self, ruleset_id: Option<&str>) -> Vec<Arc<CompiledRule>> {
        match ruleset_id {
            Some(id) => self.ruleset.filtered(id).rules,
            None => self.ruleset.rules.clone(),
        }
    }

    /// Evaluable view over this generation, optionally scoped to a ruleset.
    pub fn ruleset_view(&self, ruleset_id: Option<&str>) -> CompiledRuleset {
        match ruleset_id {
            Some(id) => self.ruleset.filtered(id),
            None => self.ruleset.clone(),
        }
    }

    /// The source definition of a rule.
    pub fn raw_rule(&self, rule_id: &str) -> Option<&Rule> {
        self.raw_rules.get(rule_id)
    }

    /// All source definitions.
    pub fn raw_rules(&self) -> impl Iterator<Item = &Rule> {
        self.raw_rules.values()
    }

    /// The source condition catalog.
    pub fn conditions(&self) -> &HashMap<String, Condition> {
        &self.conditions
    }

    /// Number of compiled (evaluable) rules.
    pub fn rule_count(&self) -> usize {
        self.ruleset.rules.len()
    }

    /// Whether a rule id exists in the source catalog (compiled or not).
    pub fn contains(&self, rule_id: &str) -> bool {
        self.raw_rules.contains_key(rule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Operator, RuleStatus};
    use crate::value::Value;

    fn rules() -> Vec<Rule> {
        vec![
            Rule::simple("R1", "a", "x", Operator::Equal, Value::Int(1)).with_priority(2),
            Rule::simple("R2", "b", "y", Operator::Equal, Value::Int(2)).with_priority(1),
            Rule::simple("R3", "c", "z", Operator::Equal, Value::Int(3))
                .with_status(RuleStatus::Inactive),
        ]
    }

    #[test]
    fn test_build_orders_and_indexes() {
        let snapshot = RegistrySnapshot::build(1, rules(), vec![], HashMap::new()).unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.rule_count(), 2);
        // Inactive rule is not compiled but is retained in the source set.
        assert!(snapshot.rule("R3").is_none());
        assert!(snapshot.contains("R3"));

        let ordered = snapshot.rules(None);
        let order: Vec<&str> = ordered.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(order, vec!["R2", "R1"]);
    }

    #[test]
    fn test_build_rejects_bad_catalog() {
        let bad = vec![Rule::composite("R1", "broken", vec!["missing".into()])];
        assert!(RegistrySnapshot::build(1, bad, vec![], HashMap::new()).is_err());
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = RegistrySnapshot::empty();
        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot.rule_count(), 0);
        assert!(snapshot.ruleset_view(None).is_empty());
    }
}
