//! # Ruleset Pipeline
//!
//! Orders a ruleset's compiled rules, evaluates each against a record,
//! aggregates scores, assembles the pattern string and resolves the action
//! recommendation from the pattern table.
//!
//! ## Ordering
//!
//! Rules run in ascending `priority`; ties break on rule id, so the order
//! is deterministic across processes. Rules whose status is inactive,
//! deprecated or archived are excluded before ordering and therefore
//! contribute no pattern position.
//!
//! ## Dry run
//!
//! Dry-run execution returns the same aggregate plus per-rule outcomes
//! split into `would_match` / `would_not_match`, and has no observable
//! side effects beyond local duration measurement.

use crate::cancel::CancelToken;
use crate::evaluator::{self, CompileError, CompiledRule, NO_MATCH_TAG};
use crate::model::{Condition, Rule};
use crate::value::DataRecord;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised while assembling or running a ruleset.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// A member rule failed compilation
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Rule ids within a ruleset must be unique
    #[error("duplicate rule id '{0}' in ruleset")]
    DuplicateRuleId(String),

    /// Pattern keys may not contain the no-match tag
    #[error("pattern key '{key}' contains the no-match tag '{tag}'")]
    InvalidPatternKey {
        /// Offending key
        key: String,
        /// Configured no-match tag
        tag: String,
    },

    /// Caller cancelled the evaluation
    #[error("evaluation cancelled")]
    Cancelled,
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// A ruleset compiled into evaluation order, plus its pattern table.
///
/// Immutable after construction and cheap to share: rules are Arc-wrapped
/// so registry generations and in-flight evaluations can hold the same
/// compiled artifacts.
#[derive(Debug, Clone)]
pub struct CompiledRuleset {
    /// Owning ruleset id, when the catalog distinguishes rulesets
    pub ruleset_id: Option<String>,
    /// Rules in evaluation order
    pub rules: Vec<Arc<CompiledRule>>,
    /// Pattern string → action recommendation
    pub patterns: Arc<HashMap<String, String>>,
    /// Tag reported for non-matching rules
    pub no_match_tag: String,
}

impl CompiledRuleset {
    /// Compile raw rules into an ordered ruleset.
    ///
    /// Excludes non-evaluable statuses, rejects duplicate ids and pattern
    /// keys containing the no-match tag, compiles every remaining rule and
    /// sorts by `(priority, rule_id)`.
    pub fn compile(
        ruleset_id: Option<String>,
        rules: &[Rule],
        conditions: &HashMap<String, Condition>,
        patterns: HashMap<String, String>,
    ) -> PipelineResult<Self> {
        let mut seen: HashSet<&str> = HashSet::new();
        for rule in rules {
            if !seen.insert(rule.rule_id.as_str()) {
                return Err(PipelineError::DuplicateRuleId(rule.rule_id.clone()));
            }
        }

        for key in patterns.keys() {
            if key.contains(NO_MATCH_TAG) {
                return Err(PipelineError::InvalidPatternKey {
                    key: key.clone(),
                    tag: NO_MATCH_TAG.to_string(),
                });
            }
        }

        let mut compiled: Vec<Arc<CompiledRule>> = rules
            .iter()
            .filter(|r| r.status.is_evaluable())
            .map(|r| evaluator::compile(r, conditions).map(Arc::new))
            .collect::<Result<_, _>>()?;
        compiled.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });

        Ok(CompiledRuleset {
            ruleset_id,
            rules: compiled,
            patterns: Arc::new(patterns),
            no_match_tag: NO_MATCH_TAG.to_string(),
        })
    }

    /// View of this ruleset restricted to rules of one ruleset id.
    ///
    /// Ordering is preserved; the pattern table is shared.
    pub fn filtered(&self, ruleset_id: &str) -> CompiledRuleset {
        CompiledRuleset {
            ruleset_id: Some(ruleset_id.to_string()),
            rules: self
                .rules
                .iter()
                .filter(|r| r.ruleset_id.as_deref() == Some(ruleset_id))
                .cloned()
                .collect(),
            patterns: Arc::clone(&self.patterns),
            no_match_tag: self.no_match_tag.clone(),
        }
    }

    /// Number of rules in evaluation order.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the ruleset has no evaluable rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Per-rule outcome reported by dry runs.
#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    /// Rule name
    pub rule_name: String,
    /// Evaluation priority
    pub priority: i64,
    /// Human-readable predicate
    pub condition_string: String,
    /// Whether the rule matched
    pub matched: bool,
    /// Tag the rule reported
    pub action_result: String,
    /// Base score (0 unless matched)
    pub rule_point: f64,
    /// Multiplier (0 unless matched)
    pub weight: f64,
    /// Wall time spent on this rule, microseconds
    pub duration_micros: u64,
}

/// Dry-run diagnostic report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DryRunReport {
    /// Rules that matched on this record
    pub would_match: Vec<RuleOutcome>,
    /// Rules that did not match
    pub would_not_match: Vec<RuleOutcome>,
}

/// Aggregate output of one pipeline run.
#[derive(Debug, Clone)]
pub struct EvaluationOutput {
    /// Sum of `rule_point * weight` across matched rules
    pub total_points: f64,
    /// Concatenated action tags, one position per evaluated rule
    pub pattern_result: String,
    /// Pattern-table lookup result, `None` when the pattern is unmapped
    pub action_recommendation: Option<String>,
    /// Number of rules evaluated
    pub rule_count: usize,
    /// Wall time of the whole run
    pub duration: Duration,
    /// Per-rule report, present for dry runs only
    pub dry_run: Option<DryRunReport>,
}

/// Evaluate a record through the ruleset.
///
/// The cancellation token is checked between rules; a cancelled run
/// returns [`PipelineError::Cancelled`] and produces no partial output.
pub fn execute(
    ruleset: &CompiledRuleset,
    record: &DataRecord,
    dry_run: bool,
    cancel: &CancelToken,
) -> PipelineResult<EvaluationOutput> {
    let started = Instant::now();
    let mut total_points = 0.0_f64;
    let mut pattern = String::with_capacity(ruleset.rules.len());
    let mut report = dry_run.then(DryRunReport::default);

    for rule in &ruleset.rules {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let rule_started = Instant::now();
        let outcome = evaluator::evaluate(rule, record, &ruleset.no_match_tag);
        if outcome.matched {
            total_points += outcome.rule_point * outcome.weight;
        }
        pattern.push_str(&outcome.action_result);

        if let Some(report) = report.as_mut() {
            let entry = RuleOutcome {
                rule_name: rule.rule_name.clone(),
                priority: rule.priority,
                condition_string: rule.condition_display.clone(),
                matched: outcome.matched,
                action_result: outcome.action_result.clone(),
                rule_point: outcome.rule_point,
                weight: outcome.weight,
                duration_micros: rule_started.elapsed().as_micros() as u64,
            };
            if outcome.matched {
                report.would_match.push(entry);
            } else {
                report.would_not_match.push(entry);
            }
        }
    }

    let action_recommendation = ruleset.patterns.get(&pattern).cloned();

    Ok(EvaluationOutput {
        total_points,
        pattern_result: pattern,
        action_recommendation,
        rule_count: ruleset.rules.len(),
        duration: started.elapsed(),
        dry_run: report,
    })
}
