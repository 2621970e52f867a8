//! # Catalog Model
//!
//! Declarative definitions the engine ingests: reusable conditions, scored
//! rules and named rulesets with their pattern tables. These are the
//! persisted shapes; the evaluator compiles them into executable form.
//!
//! ## Rule-set file format
//!
//! ```json
//! {
//!   "rules_set": [
//!     {"id": "R1", "rule_name": "high issue", "attribute": "issue",
//!      "condition": "greater_than", "constant": 30,
//!      "weight": 30, "rule_point": 20, "priority": 1, "action_result": "Y"}
//!   ],
//!   "patterns": {"YYY": "Approved", "Y--": "Rejected"}
//! }
//! ```

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed comparison vocabulary.
///
/// All comparisons use the attribute's runtime type; numeric operands are
/// coerced from strings where unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Strict equality after numeric/string coercion
    Equal,
    /// Negated equality
    NotEqual,
    /// Numeric `>`; NaN compares false
    GreaterThan,
    /// Numeric `>=`
    GreaterThanOrEqual,
    /// Numeric `<`
    LessThan,
    /// Numeric `<=`
    LessThanOrEqual,
    /// Membership in a constant list
    In,
    /// Negated membership
    NotIn,
    /// Inclusive `[lo, hi]` numeric range
    Range,
    /// Substring match
    Contains,
    /// Full-string regex match
    Regex,
}

impl Operator {
    /// Wire name of the operator (the serde snake_case form).
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Equal => "equal",
            Operator::NotEqual => "not_equal",
            Operator::GreaterThan => "greater_than",
            Operator::GreaterThanOrEqual => "greater_than_or_equal",
            Operator::LessThan => "less_than",
            Operator::LessThanOrEqual => "less_than_or_equal",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Range => "range",
            Operator::Contains => "contains",
            Operator::Regex => "regex",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle status of a rule.
///
/// Only `Draft` and `Active` rules participate in evaluation ordering;
/// `Inactive`, `Deprecated` and `Archived` rules are excluded before the
/// ruleset is ordered, so they contribute no pattern position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// Being authored, still evaluated (visible in dev)
    Draft,
    /// Serving traffic
    #[default]
    Active,
    /// Temporarily disabled
    Inactive,
    /// Scheduled for removal
    Deprecated,
    /// Retained for audit only
    Archived,
}

impl RuleStatus {
    /// Whether rules in this status take part in evaluation.
    pub fn is_evaluable(&self) -> bool {
        matches!(self, RuleStatus::Draft | RuleStatus::Active)
    }
}

/// A reusable named predicate, referenced by composite rules.
///
/// Immutable once committed; edits produce a new condition id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Unique id referenced from rules
    pub condition_id: String,
    /// Attribute name on the input record
    pub attribute: String,
    /// Comparison operator
    pub operator: Operator,
    /// Scalar, list or `[lo, hi]` range constant
    pub constant: Value,
}

/// A scored rule: either an inline attribute/operator/constant triple
/// (simple rule) or a list of condition references combined with AND
/// (composite rule).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule id
    #[serde(rename = "id")]
    pub rule_id: String,
    /// Human-readable name
    pub rule_name: String,
    /// Lower priority runs first; ties break on rule id
    #[serde(default)]
    pub priority: i64,
    /// Base score; kept as a raw value so malformed definitions degrade to
    /// a skipped rule instead of failing the whole load
    #[serde(default = "default_rule_point")]
    pub rule_point: Value,
    /// Score multiplier
    #[serde(default = "default_weight")]
    pub weight: Value,
    /// Tag emitted into the pattern when the rule matches
    #[serde(default = "default_action_result")]
    pub action_result: String,
    /// Inline predicate attribute (simple rule)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Inline predicate operator; the file format calls this `condition`
    #[serde(rename = "condition", default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    /// Inline predicate constant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<Value>,
    /// Referenced condition ids, AND-combined (composite rule)
    #[serde(rename = "conditions", default, skip_serializing_if = "Vec::is_empty")]
    pub condition_refs: Vec<String>,
    /// Owning ruleset, when the catalog holds more than one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruleset_id: Option<String>,
    /// Lifecycle status
    #[serde(default)]
    pub status: RuleStatus,
    /// Monotonic version number, bumped on every write
    #[serde(default)]
    pub version: u64,
    /// Last modification time, drives the repository freshness token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_rule_point() -> Value {
    Value::Float(0.0)
}

fn default_weight() -> Value {
    Value::Float(1.0)
}

fn default_action_result() -> String {
    "Y".to_string()
}

impl Rule {
    /// Minimal simple rule, used pervasively in tests and the DMN compiler.
    pub fn simple(
        rule_id: impl Into<String>,
        rule_name: impl Into<String>,
        attribute: impl Into<String>,
        operator: Operator,
        constant: Value,
    ) -> Self {
        Rule {
            rule_id: rule_id.into(),
            rule_name: rule_name.into(),
            priority: 0,
            rule_point: default_rule_point(),
            weight: default_weight(),
            action_result: default_action_result(),
            attribute: Some(attribute.into()),
            operator: Some(operator),
            constant: Some(constant),
            condition_refs: Vec::new(),
            ruleset_id: None,
            status: RuleStatus::Active,
            version: 1,
            updated_at: None,
        }
    }

    /// Composite rule over named conditions.
    pub fn composite(
        rule_id: impl Into<String>,
        rule_name: impl Into<String>,
        condition_refs: Vec<String>,
    ) -> Self {
        Rule {
            rule_id: rule_id.into(),
            rule_name: rule_name.into(),
            priority: 0,
            rule_point: default_rule_point(),
            weight: default_weight(),
            action_result: default_action_result(),
            attribute: None,
            operator: None,
            constant: None,
            condition_refs,
            ruleset_id: None,
            status: RuleStatus::Active,
            version: 1,
            updated_at: None,
        }
    }

    /// Builder-style priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Builder-style scoring.
    pub fn with_score(mut self, rule_point: f64, weight: f64) -> Self {
        self.rule_point = Value::Float(rule_point);
        self.weight = Value::Float(weight);
        self
    }

    /// Builder-style action tag.
    pub fn with_action(mut self, tag: impl Into<String>) -> Self {
        self.action_result = tag.into();
        self
    }

    /// Builder-style status.
    pub fn with_status(mut self, status: RuleStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder-style ruleset membership.
    pub fn in_ruleset(mut self, ruleset_id: impl Into<String>) -> Self {
        self.ruleset_id = Some(ruleset_id.into());
        self
    }
}

/// A named collection of rules plus the pattern table routing concatenated
/// action tags to a recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    /// Unique ruleset id
    pub ruleset_id: String,
    /// Display name
    pub name: String,
    /// Exactly one ruleset in a catalog may be the default
    #[serde(default)]
    pub is_default: bool,
    /// Monotonically increasing version
    #[serde(default)]
    pub version: u64,
    /// Member rules
    pub rules: Vec<Rule>,
    /// Pattern string → action recommendation
    #[serde(default)]
    pub patterns: HashMap<String, String>,
}

/// On-disk rule-set file: the file-backed repository reads and writes this
/// shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesFile {
    /// Flat rule list
    pub rules_set: Vec<Rule>,
    /// Pattern table
    #[serde(default)]
    pub patterns: HashMap<String, String>,
}

/// On-disk conditions file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionsFile {
    /// Reusable condition definitions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
