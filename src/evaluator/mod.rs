//! # Rule Evaluator
//!
//! Compiles a [`Rule`] into a predicate over a [`DataRecord`] and runs it.
//! Compilation validates the operator/constant pairing once, resolves
//! composite condition references, and materializes regexes, so evaluation
//! is allocation-light and shareable across threads without synchronization.
//!
//! ## Semantics
//!
//! - A missing attribute never raises: the predicate is false and the rule
//!   reports the configured no-match tag.
//! - Ordering operators compare as f64; NaN compares false.
//! - `equal` against a list-valued attribute degrades to membership, which
//!   is how enriched multi-valued decision outputs are matched.
//! - A matched rule whose `rule_point` or `weight` fails numeric coercion
//!   is skipped with a warning and contributes nothing to the score.

use crate::model::{Condition, Operator, Rule, RuleStatus};
use crate::value::{DataRecord, Value};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Default tag reported when a rule does not match.
pub const NO_MATCH_TAG: &str = "-";

/// Rule compilation errors.
///
/// Any of these rejects the rule (and, during a registry reload, the whole
/// snapshot).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    /// Rule has neither an inline triple nor condition references
    #[error("rule '{rule_id}' has no predicate: expected attribute/condition/constant or condition refs")]
    MissingPredicate {
        /// Offending rule
        rule_id: String,
    },

    /// Composite rule references an unknown condition
    #[error("rule '{rule_id}' references missing condition '{condition_id}'")]
    MissingCondition {
        /// Offending rule
        rule_id: String,
        /// Unresolved reference
        condition_id: String,
    },

    /// Constant shape does not fit the operator
    #[error("rule '{rule_id}': malformed constant for operator '{operator}': {detail}")]
    MalformedConstant {
        /// Offending rule
        rule_id: String,
        /// Operator the constant was paired with
        operator: Operator,
        /// What was wrong
        detail: String,
    },

    /// Regex constant failed to compile
    #[error("rule '{rule_id}': invalid regex pattern: {detail}")]
    InvalidRegex {
        /// Offending rule
        rule_id: String,
        /// Error from the regex crate
        detail: String,
    },
}

/// Result alias for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// A compiled predicate tree. Leaves are operator-specific so the per-record
/// hot path does no re-validation.
#[derive(Debug, Clone)]
enum Predicate {
    /// `equal` / `not_equal`
    Equality {
        attribute: String,
        constant: Value,
        negate: bool,
    },
    /// Numeric ordering comparison against a precoerced bound
    Ordering {
        attribute: String,
        operator: Operator,
        bound: f64,
    },
    /// `in` / `not_in` against a constant list
    Membership {
        attribute: String,
        items: Vec<Value>,
        negate: bool,
    },
    /// Inclusive numeric range
    Range {
        attribute: String,
        lo: f64,
        hi: f64,
    },
    /// Substring match
    Contains {
        attribute: String,
        needle: String,
    },
    /// Full-string regex match (anchored at compile time)
    Pattern {
        attribute: String,
        regex: Arc<Regex>,
    },
    /// AND of composite condition predicates
    All(Vec<Predicate>),
    /// Wildcard: always true (DMN `-` cells)
    True,
}

impl Predicate {
    fn matches(&self, record: &DataRecord) -> bool {
        match self {
            Predicate::Equality {
                attribute,
                constant,
                negate,
            } => {
                let Some(value) = record.get(attribute) else {
                    return false;
                };
                let hit = match value {
                    // Multi-valued attribute (e.g. a COLLECT enrichment):
                    // equality means membership.
                    Value::List(items) => items.iter().any(|v| v.loosely_equals(constant)),
                    other => other.loosely_equals(constant),
                };
                hit != *negate
            }
            Predicate::Ordering {
                attribute,
                operator,
                bound,
            } => {
                let Some(actual) = record.get(attribute).and_then(Value::as_f64) else {
                    return false;
                };
                if actual.is_nan() || bound.is_nan() {
                    return false;
                }
                match operator {
                    Operator::GreaterThan => actual > *bound,
                    Operator::GreaterThanOrEqual => actual >= *bound,
                    Operator::LessThan => actual < *bound,
                    Operator::LessThanOrEqual => actual <= *bound,
                    _ => false,
                }
            }
            Predicate::Membership {
                attribute,
                items,
                negate,
            } => {
                let Some(value) = record.get(attribute) else {
                    return false;
                };
                let hit = match value {
                    Value::List(actual) => actual
                        .iter()
                        .any(|v| items.iter().any(|item| item.loosely_equals(v))),
                    other => items.iter().any(|item| item.loosely_equals(other)),
                };
                hit != *negate
            }
            Predicate::Range { attribute, lo, hi } => {
                let Some(actual) = record.get(attribute).and_then(Value::as_f64) else {
                    return false;
                };
                !actual.is_nan() && actual >= *lo && actual <= *hi
            }
            Predicate::Contains { attribute, needle } => record
                .get(attribute)
                .and_then(Value::coerce_string)
                .is_some_and(|haystack| haystack.contains(needle)),
            Predicate::Pattern { attribute, regex } => record
                .get(attribute)
                .and_then(Value::coerce_string)
                .is_some_and(|s| regex.is_match(&s)),
            Predicate::All(parts) => parts.iter().all(|p| p.matches(record)),
            Predicate::True => true,
        }
    }
}

/// A rule compiled and ready to evaluate.
///
/// Immutable after compilation; safe to share across worker threads.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Original rule id
    pub rule_id: String,
    /// Original rule name
    pub rule_name: String,
    /// Evaluation order key
    pub priority: i64,
    /// Tag emitted when matched
    pub action_result: String,
    /// Coerced base score; `None` when the definition was non-numeric
    pub rule_point: Option<f64>,
    /// Coerced multiplier; `None` when the definition was non-numeric
    pub weight: Option<f64>,
    /// Owning ruleset
    pub ruleset_id: Option<String>,
    /// Lifecycle status carried from the definition
    pub status: RuleStatus,
    /// Definition version the compile came from
    pub version: u64,
    /// Human-readable predicate, shown in dry-run reports
    pub condition_display: String,
    predicate: Predicate,
}

impl CompiledRule {
    /// Run the predicate only (no scoring).
    pub fn matches(&self, record: &DataRecord) -> bool {
        self.predicate.matches(record)
    }
}

/// Outcome of evaluating one compiled rule against a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEvaluation {
    /// Whether the predicate matched and the rule scored
    pub matched: bool,
    /// Matched rules report their own tag; everything else reports the
    /// no-match tag
    pub action_result: String,
    /// Base score contributed (0 unless matched)
    pub rule_point: f64,
    /// Multiplier contributed (0 unless matched)
    pub weight: f64,
}

/// Evaluate a compiled rule against a record.
///
/// Never fails: missing attributes and malformed scores degrade to a
/// no-match outcome, with a warning in the malformed-score case.
pub fn evaluate(rule: &CompiledRule, record: &DataRecord, no_match_tag: &str) -> RuleEvaluation {
    let no_match = |tag: &str| RuleEvaluation {
        matched: false,
        action_result: tag.to_string(),
        rule_point: 0.0,
        weight: 0.0,
    };

    if !rule.predicate.matches(record) {
        return no_match(no_match_tag);
    }

    match (rule.rule_point, rule.weight) {
        (Some(point), Some(weight)) => RuleEvaluation {
            matched: true,
            action_result: rule.action_result.clone(),
            rule_point: point,
            weight,
        },
        _ => {
            warn!(
                rule_id = %rule.rule_id,
                "skipping rule: rule_point or weight failed numeric coercion"
            );
            no_match(no_match_tag)
        }
    }
}

/// Compile a rule against the condition catalog.
///
/// Simple rules compile their inline triple; composite rules resolve every
/// referenced condition and AND the compiled predicates. The combined
/// expression is materialized once.
pub fn compile(rule: &Rule, conditions: &HashMap<String, Condition>) -> CompileResult<CompiledRule> {
    let (predicate, display) = if !rule.condition_refs.is_empty() {
        let mut parts = Vec::with_capacity(rule.condition_refs.len());
        let mut displays = Vec::with_capacity(rule.condition_refs.len());
        for condition_id in &rule.condition_refs {
            let condition =
                conditions
                    .get(condition_id)
                    .ok_or_else(|| CompileError::MissingCondition {
                        rule_id: rule.rule_id.clone(),
                        condition_id: condition_id.clone(),
                    })?;
            let (p, d) = compile_leaf(
                &rule.rule_id,
                &condition.attribute,
                condition.operator,
                &condition.constant,
            )?;
            parts.push(p);
            displays.push(d);
        }
        (Predicate::All(parts), displays.join(" AND "))
    } else {
        match (&rule.attribute, rule.operator, &rule.constant) {
            (Some(attribute), Some(operator), Some(constant)) => {
                compile_leaf(&rule.rule_id, attribute, operator, constant)?
            }
            _ => {
                return Err(CompileError::MissingPredicate {
                    rule_id: rule.rule_id.clone(),
                })
            }
        }
    };

    Ok(CompiledRule {
        rule_id: rule.rule_id.clone(),
        rule_name: rule.rule_name.clone(),
        priority: rule.priority,
        action_result: rule.action_result.clone(),
        rule_point: rule.rule_point.as_f64(),
        weight: rule.weight.as_f64(),
        ruleset_id: rule.ruleset_id.clone(),
        status: rule.status,
        version: rule.version,
        condition_display: display,
        predicate,
    })
}

/// Compile an always-true rule (DMN wildcard rows).
pub(crate) fn compile_wildcard(rule: &Rule) -> CompiledRule {
    CompiledRule {
        rule_id: rule.rule_id.clone(),
        rule_name: rule.rule_name.clone(),
        priority: rule.priority,
        action_result: rule.action_result.clone(),
        rule_point: rule.rule_point.as_f64(),
        weight: rule.weight.as_f64(),
        ruleset_id: rule.ruleset_id.clone(),
        status: rule.status,
        version: rule.version,
        condition_display: "-".to_string(),
        predicate: Predicate::True,
    }
}

fn compile_leaf(
    rule_id: &str,
    attribute: &str,
    operator: Operator,
    constant: &Value,
) -> CompileResult<(Predicate, String)> {
    let display = format!("{} {} {}", attribute, operator, constant);
    let malformed = |detail: &str| CompileError::MalformedConstant {
        rule_id: rule_id.to_string(),
        operator,
        detail: detail.to_string(),
    };

    let predicate = match operator {
        Operator::Equal | Operator::NotEqual => Predicate::Equality {
            attribute: attribute.to_string(),
            constant: constant.clone(),
            negate: operator == Operator::NotEqual,
        },
        Operator::GreaterThan
        | Operator::GreaterThanOrEqual
        | Operator::LessThan
        | Operator::LessThanOrEqual => {
            let bound = constant
                .as_f64()
                .ok_or_else(|| malformed("expected a numeric operand"))?;
            Predicate::Ordering {
                attribute: attribute.to_string(),
                operator,
                bound,
            }
        }
        Operator::In | Operator::NotIn => {
            let items = constant
                .as_list()
                .ok_or_else(|| malformed("expected a list operand"))?;
            Predicate::Membership {
                attribute: attribute.to_string(),
                items: items.to_vec(),
                negate: operator == Operator::NotIn,
            }
        }
        Operator::Range => {
            let items = constant
                .as_list()
                .ok_or_else(|| malformed("expected [lo, hi]"))?;
            if items.len() != 2 {
                return Err(malformed("expected exactly two bounds"));
            }
            let lo = items[0]
                .as_f64()
                .ok_or_else(|| malformed("lower bound is not numeric"))?;
            let hi = items[1]
                .as_f64()
                .ok_or_else(|| malformed("upper bound is not numeric"))?;
            if lo > hi {
                return Err(malformed("lower bound exceeds upper bound"));
            }
            Predicate::Range {
                attribute: attribute.to_string(),
                lo,
                hi,
            }
        }
        Operator::Contains => {
            let needle = constant
                .coerce_string()
                .ok_or_else(|| malformed("expected a string operand"))?;
            Predicate::Contains {
                attribute: attribute.to_string(),
                needle,
            }
        }
        Operator::Regex => {
            let pattern = constant
                .as_str()
                .ok_or_else(|| malformed("expected a string pattern"))?;
            // Anchor so the whole attribute value must match.
            let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                CompileError::InvalidRegex {
                    rule_id: rule_id.to_string(),
                    detail: e.to_string(),
                }
            })?;
            Predicate::Pattern {
                attribute: attribute.to_string(),
                regex: Arc::new(regex),
            }
        }
    };

    Ok((predicate, display))
}
