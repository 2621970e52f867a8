//! # DMN Compiler & Dependency Scheduler
//!
//! Alternative front-end to the rule evaluator: parses XML decision tables,
//! compiles each row into the same compiled-rule shape the pipeline runs,
//! resolves inter-decision dependencies via topological sort and executes
//! decisions in order, enriching the shared record with each decision's
//! outputs so downstream decisions see them as inputs.
//!
//! ## Pipeline
//!
//! ```text
//! XML source
//!     ↓ parser       (quick-xml event reader)
//! DmnDocument
//!     ↓ compile      (FEEL cells → predicates, rows → compiled rules)
//! CompiledDmnDocument
//!     ↓ schedule     (Kahn's algorithm, cycle fallback)
//! execution order
//!     ↓ execute      (rows evaluated, outputs enrich the record)
//! DmnOutput
//! ```

pub mod feel;
pub mod parser;
pub mod schedule;

pub use parser::parse_document;
pub use schedule::{schedule as schedule_decisions, Schedule};

use crate::cancel::CancelToken;
use crate::evaluator::{self, CompileError, CompiledRule};
use crate::model::{Condition, Rule};
use crate::pipeline::{DryRunReport, RuleOutcome};
use crate::value::{DataRecord, Value};
use feel::FeelTerm;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default base score for decision-table rows.
pub const DMN_DEFAULT_POINT: f64 = 10.0;
/// Default weight for decision-table rows.
pub const DMN_DEFAULT_WEIGHT: f64 = 1.0;

/// DMN front-end errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DmnError {
    /// Low-level XML failure
    #[error("malformed DMN XML: {0}")]
    Xml(String),

    /// Structurally invalid document
    #[error("invalid DMN document: {0}")]
    MalformedDocument(String),

    /// No `decision` elements found
    #[error("DMN document contains no decisions")]
    Empty,

    /// A cell is outside the supported FEEL subset
    #[error("decision '{decision_id}' row {row}: unsupported FEEL fragment '{fragment}'")]
    UnsupportedFeel {
        /// Decision the cell belongs to
        decision_id: String,
        /// 1-based row number
        row: usize,
        /// Raw cell text
        fragment: String,
    },

    /// Row failed rule compilation
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Caller cancelled the run
    #[error("DMN execution cancelled")]
    Cancelled,
}

/// Result alias for the DMN front-end.
pub type DmnResult<T> = Result<T, DmnError>;

/// How a decision table combines matched rows' outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitPolicy {
    /// At most one row is expected to match; take the first
    Unique,
    /// Take the first matched row
    First,
    /// Collect every matched output
    Collect,
    /// All matched outputs agree; take the first
    Any,
    /// Row order expresses priority; take the first
    Priority,
}

impl HitPolicy {
    /// Parse the `hitPolicy` attribute value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UNIQUE" => Some(HitPolicy::Unique),
            "FIRST" => Some(HitPolicy::First),
            "COLLECT" => Some(HitPolicy::Collect),
            "ANY" => Some(HitPolicy::Any),
            "PRIORITY" => Some(HitPolicy::Priority),
            _ => None,
        }
    }

    /// Whether matched outputs enrich as a list when more than one row hits.
    fn collects(self) -> bool {
        matches!(self, HitPolicy::Collect | HitPolicy::Any)
    }
}

/// One decision-table row as parsed: one entry per input/output column.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRow {
    /// FEEL fragments, one per input column
    pub input_entries: Vec<String>,
    /// Output literals, one per output column
    pub output_entries: Vec<String>,
}

/// Parsed decision metadata and table.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Decision id (the `#href` target of dependents)
    pub decision_id: String,
    /// Display name
    pub decision_name: String,
    /// Ids of decisions this one depends on
    pub requirements: Vec<String>,
    /// Ordered input labels; each label is the attribute name read
    pub inputs: Vec<String>,
    /// Ordered output labels; each label is the key enriched on the record
    pub outputs: Vec<String>,
    /// Output combination policy
    pub hit_policy: HitPolicy,
    /// Table rows in declared order
    pub rows: Vec<DecisionRow>,
}

/// A parsed DMN document, decisions in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct DmnDocument {
    /// All decisions found in the document
    pub decisions: Vec<Decision>,
}

/// A compiled row: the evaluator-ready rule plus the output literal per
/// output column.
#[derive(Debug, Clone)]
pub struct CompiledDmnRow {
    /// Compiled predicate + scoring
    pub rule: CompiledRule,
    /// Unquoted output literal per output column
    pub outputs: Vec<String>,
}

/// A decision compiled for execution.
#[derive(Debug, Clone)]
pub struct CompiledDecision {
    /// Decision id
    pub decision_id: String,
    /// Display name
    pub decision_name: String,
    /// Output combination policy
    pub hit_policy: HitPolicy,
    /// Output labels, the enrichment keys
    pub output_labels: Vec<String>,
    /// Compiled rows in declared order
    pub rows: Vec<CompiledDmnRow>,
}

/// A fully compiled document with its execution schedule.
#[derive(Debug, Clone)]
pub struct CompiledDmnDocument {
    /// Compiled decisions in declared order
    pub decisions: Vec<CompiledDecision>,
    /// Topological execution order (or declared-order fallback)
    pub schedule: Schedule,
}

/// Per-decision execution outcome.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    /// Decision id
    pub decision_id: String,
    /// Display name
    pub decision_name: String,
    /// Concatenated row tags for this decision
    pub pattern: String,
    /// Points contributed by this decision
    pub points: f64,
    /// Indices of matched rows (0-based)
    pub matched_rows: Vec<usize>,
    /// Values written into the shared record, in output-column order
    pub enrichments: Vec<(String, Value)>,
}

/// Aggregate output of a multi-decision run.
#[derive(Debug, Clone)]
pub struct DmnOutput {
    /// Sum of row scores across all decisions
    pub total_points: f64,
    /// Row tags concatenated across decisions in execution order
    pub pattern_result: String,
    /// The input record after enrichment
    pub record: DataRecord,
    /// Per-decision outcomes in execution order
    pub decisions: Vec<DecisionOutcome>,
    /// Decision ids involved in a dependency cycle, when one was detected
    pub cycle: Option<Vec<String>>,
    /// Wall time of the run
    pub duration: Duration,
    /// Per-row report, present for dry runs
    pub dry_run: Option<DryRunReport>,
}

/// Compile a parsed document: every row of every decision becomes a
/// compiled rule, and the dependency schedule is computed once.
pub fn compile_document(doc: &DmnDocument) -> DmnResult<CompiledDmnDocument> {
    let decisions = doc
        .decisions
        .iter()
        .map(compile_decision)
        .collect::<DmnResult<Vec<_>>>()?;
    let schedule = schedule::schedule(&doc.decisions);
    Ok(CompiledDmnDocument {
        decisions,
        schedule,
    })
}

fn compile_decision(decision: &Decision) -> DmnResult<CompiledDecision> {
    let mut rows = Vec::with_capacity(decision.rows.len());

    for (row_idx, row) in decision.rows.iter().enumerate() {
        let row_number = row_idx + 1;
        let mut conditions: HashMap<String, Condition> = HashMap::new();
        let mut refs: Vec<String> = Vec::new();

        for (col, cell) in row.input_entries.iter().enumerate() {
            let term = feel::parse(cell).ok_or_else(|| DmnError::UnsupportedFeel {
                decision_id: decision.decision_id.clone(),
                row: row_number,
                fragment: cell.clone(),
            })?;
            let FeelTerm::Predicate { operator, constant } = term else {
                continue;
            };
            let attribute = decision
                .inputs
                .get(col)
                .cloned()
                .ok_or_else(|| {
                    DmnError::MalformedDocument(format!(
                        "decision '{}' row {}: more input entries than input columns",
                        decision.decision_id, row_number
                    ))
                })?;
            let condition_id = format!("{}:{}:{}", decision.decision_id, row_number, col);
            conditions.insert(
                condition_id.clone(),
                Condition {
                    condition_id: condition_id.clone(),
                    attribute,
                    operator,
                    constant,
                },
            );
            refs.push(condition_id);
        }

        let outputs: Vec<String> = row
            .output_entries
            .iter()
            .map(|cell| feel::output_literal(cell))
            .collect();
        let action = outputs
            .first()
            .cloned()
            .unwrap_or_else(|| evaluator::NO_MATCH_TAG.to_string());

        let template = Rule {
            rule_id: format!("{}#{}", decision.decision_id, row_number),
            rule_name: format!("{} row {}", decision.decision_name, row_number),
            priority: row_number as i64,
            ..Rule::composite("", "", refs.clone())
        }
        .with_score(DMN_DEFAULT_POINT, DMN_DEFAULT_WEIGHT)
        .with_action(action);

        let rule = if refs.is_empty() {
            evaluator::compile_wildcard(&template)
        } else {
            evaluator::compile(&template, &conditions)?
        };

        rows.push(CompiledDmnRow { rule, outputs });
    }

    Ok(CompiledDecision {
        decision_id: decision.decision_id.clone(),
        decision_name: decision.decision_name.clone(),
        hit_policy: decision.hit_policy,
        output_labels: decision.outputs.clone(),
        rows,
    })
}

/// Execute the compiled document against a record.
///
/// Decisions run in schedule order; after each decision, every output
/// label produced by a matched row is assigned into the record so
/// dependent decisions resolve it as an input. Aggregation concatenates
/// patterns and sums points across decisions in execution order.
pub fn execute(
    compiled: &CompiledDmnDocument,
    record: &DataRecord,
    dry_run: bool,
    cancel: &CancelToken,
) -> DmnResult<DmnOutput> {
    let started = Instant::now();
    let mut record = record.clone();
    let mut total_points = 0.0_f64;
    let mut pattern = String::new();
    let mut outcomes = Vec::with_capacity(compiled.decisions.len());
    let mut report = dry_run.then(DryRunReport::default);

    for &idx in &compiled.schedule.order {
        if cancel.is_cancelled() {
            return Err(DmnError::Cancelled);
        }
        let decision = &compiled.decisions[idx];
        let outcome = execute_decision(decision, &mut record, report.as_mut());
        total_points += outcome.points;
        pattern.push_str(&outcome.pattern);
        outcomes.push(outcome);
    }

    Ok(DmnOutput {
        total_points,
        pattern_result: pattern,
        record,
        decisions: outcomes,
        cycle: compiled.schedule.cycle.clone(),
        duration: started.elapsed(),
        dry_run: report,
    })
}

fn execute_decision(
    decision: &CompiledDecision,
    record: &mut DataRecord,
    mut report: Option<&mut DryRunReport>,
) -> DecisionOutcome {
    let mut pattern = String::with_capacity(decision.rows.len());
    let mut points = 0.0_f64;
    let mut matched_rows = Vec::new();

    for (row_idx, row) in decision.rows.iter().enumerate() {
        let row_started = Instant::now();
        let outcome = evaluator::evaluate(&row.rule, record, evaluator::NO_MATCH_TAG);
        if outcome.matched {
            points += outcome.rule_point * outcome.weight;
            matched_rows.push(row_idx);
        }
        pattern.push_str(&outcome.action_result);

        if let Some(report) = report.as_deref_mut() {
            let entry = RuleOutcome {
                rule_name: row.rule.rule_name.clone(),
                priority: row.rule.priority,
                condition_string: row.rule.condition_display.clone(),
                matched: outcome.matched,
                action_result: outcome.action_result.clone(),
                rule_point: outcome.rule_point,
                weight: outcome.weight,
                duration_micros: row_started.elapsed().as_micros() as u64,
            };
            if outcome.matched {
                report.would_match.push(entry);
            } else {
                report.would_not_match.push(entry);
            }
        }
    }

    // Enrich the shared record so dependent decisions see our outputs.
    let mut enrichments = Vec::new();
    for (col, label) in decision.output_labels.iter().enumerate() {
        let produced: Vec<&str> = matched_rows
            .iter()
            .filter_map(|&row_idx| decision.rows[row_idx].outputs.get(col))
            .map(String::as_str)
            .collect();
        let value = match produced.as_slice() {
            [] => continue,
            [single] => Value::Str((*single).to_string()),
            many if decision.hit_policy.collects() => {
                Value::List(many.iter().map(|s| Value::Str((*s).to_string())).collect())
            }
            many => Value::Str(many[0].to_string()),
        };
        record.insert(label.clone(), value.clone());
        enrichments.push((label.clone(), value));
    }

    DecisionOutcome {
        decision_id: decision.decision_id.clone(),
        decision_name: decision.decision_name.clone(),
        pattern,
        points,
        matched_rows,
        enrichments,
    }
}

/// Parse, compile and execute DMN XML in one call.
pub fn execute_source(
    xml: &str,
    record: &DataRecord,
    dry_run: bool,
    cancel: &CancelToken,
) -> DmnResult<DmnOutput> {
    let doc = parser::parse_document(xml)?;
    let compiled = compile_document(&doc)?;
    execute(&compiled, record, dry_run, cancel)
}
