//! # Service Facade
//!
//! Wires the registry, repository, execution-log sink, DMN front-end,
//! workflow dispatcher, version store and A/B engine into the operation
//! surface the transport layer exposes. Every dependency is passed at
//! construction so tests can substitute any of them.
//!
//! ## Execution semantics
//!
//! - A request pins one registry generation for its entire evaluation.
//! - Non-dry-run evaluations append exactly one execution record through
//!   the bounded log sink; dry runs and cancelled requests append nothing.
//! - When a running A/B test targets a rule in the evaluated ruleset, the
//!   assigned variant's version snapshot is substituted before evaluation
//!   and the execution record carries the test id and variant.

use crate::abtest::{AbTestEngine, AbTestMetrics, AbTestSpec, AbTest, Variant};
use crate::cancel::CancelToken;
use crate::config::{BackendKind, Config};
use crate::dmn::{self, DmnOutput};
use crate::error::{EngineError, EngineResult};
use crate::evaluator;
use crate::execlog::{ExecutionLogSink, ExecutionRecord};
use crate::executor::{self, BatchOptions, BatchResult};
use crate::model::Rule;
use crate::pipeline::{self, CompiledRuleset, DryRunReport};
use crate::registry::{
    RegistryStatus, ReloadMonitor, RuleRegistry, Subscription, ValidationReport,
};
use crate::repository::{FileRepository, MemoryRepository, Repository};
use crate::value::{DataRecord, Value};
use crate::versioning::{FieldDiff, RuleVersion, VersionStore};
use crate::workflow::{
    HandlerFactory, MapHandlerFactory, StageTrace, WorkflowDispatcher, WorkflowOutcome,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

/// Per-request execution options.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteOptions {
    /// Evaluate without side effects, returning per-rule outcomes
    #[serde(default)]
    pub dry_run: bool,
    /// Restrict evaluation to one ruleset
    #[serde(default)]
    pub ruleset_id: Option<String>,
    /// Caller-supplied correlation id; generated when absent
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Stable A/B assignment key (user id, session id, …)
    #[serde(default)]
    pub assignment_key: Option<String>,
}

/// Active A/B assignment attached to an execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbAssignment {
    /// Test that assigned this request
    pub test_id: String,
    /// Assigned variant
    pub variant: Variant,
}

/// Result of one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Unique execution id
    pub execution_id: Uuid,
    /// Correlation id (caller-supplied or generated)
    pub correlation_id: String,
    /// Aggregate score
    pub total_points: f64,
    /// Concatenated action tags
    pub pattern_result: String,
    /// Pattern-table recommendation
    pub action_recommendation: Option<String>,
    /// Wall time, milliseconds
    pub duration_ms: f64,
    /// Per-rule report, dry runs only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<DryRunReport>,
    /// A/B assignment, when a test applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ab_test: Option<AbAssignment>,
}

/// Per-decision summary in a DMN result.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionSummary {
    /// Decision id
    pub decision_id: String,
    /// Decision display name
    pub decision_name: String,
    /// Row tags for this decision
    pub pattern: String,
    /// Points contributed
    pub points: f64,
    /// Values written into the data dictionary
    pub enrichments: Vec<(String, serde_json::Value)>,
}

/// Result of a DMN execution.
#[derive(Debug, Clone, Serialize)]
pub struct DmnExecutionResult {
    /// Unique execution id
    pub execution_id: Uuid,
    /// Correlation id
    pub correlation_id: String,
    /// Aggregate score across decisions
    pub total_points: f64,
    /// Row tags concatenated across decisions in execution order
    pub pattern_result: String,
    /// The record after enrichment
    pub enriched_data: serde_json::Value,
    /// Per-decision outcomes in execution order
    pub decisions: Vec<DecisionSummary>,
    /// Cycle members, when the scheduler fell back to declared order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<Vec<String>>,
    /// Wall time, milliseconds
    pub duration_ms: f64,
    /// Per-row report, dry runs only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<DryRunReport>,
}

/// DMN input source.
#[derive(Debug, Clone)]
pub enum DmnSource {
    /// Inline XML content
    Content(String),
    /// Path to an XML file
    File(std::path::PathBuf),
}

/// Result of a workflow execution.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowExecutionResult {
    /// Process name
    pub process_name: String,
    /// Record after the final stage
    pub data: serde_json::Value,
    /// Stage traces in execution order
    pub stages: Vec<StageTrace>,
    /// Wall time, milliseconds
    pub duration_ms: f64,
}

/// Health/status view of the whole service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Registry status block
    #[serde(flatten)]
    pub registry: RegistryStatus,
    /// Whether the registry is within the staleness threshold
    pub fresh: bool,
    /// Seconds since service construction
    pub uptime_secs: u64,
    /// Execution records dropped on queue overflow
    pub execution_log_dropped: u64,
}

/// The rules service.
pub struct RuleService {
    config: Config,
    repository: Arc<dyn Repository>,
    registry: Arc<RuleRegistry>,
    log_sink: ExecutionLogSink,
    versions: VersionStore,
    abtests: AbTestEngine,
    dispatcher: WorkflowDispatcher,
    monitor: Mutex<Option<ReloadMonitor>>,
    started_at: Instant,
}

impl RuleService {
    /// Build the service from configuration, constructing the configured
    /// repository backend, and load the initial snapshot.
    pub fn from_config(config: Config) -> EngineResult<Self> {
        let repository: Arc<dyn Repository> = match config.storage.backend {
            BackendKind::File => Arc::new(FileRepository::new(
                config.storage.rules_config_path.clone(),
                config.storage.conditions_config_path.clone(),
                config.storage.data_dir.clone(),
            )?),
            BackendKind::Memory => Arc::new(MemoryRepository::new()),
        };
        let service = Self::new(config, repository);
        service.reload()?;
        Ok(service)
    }

    /// Build the service over an explicit repository (tests, embedding).
    ///
    /// Does not load the catalog; call [`RuleService::reload`].
    pub fn new(config: Config, repository: Arc<dyn Repository>) -> Self {
        let registry = Arc::new(RuleRegistry::with_buffer(
            repository.clone(),
            config.registry.subscriber_buffer,
        ));
        let log_sink =
            ExecutionLogSink::new(repository.clone(), config.execution.log_queue_capacity);
        let versions = VersionStore::new(repository.clone());
        let abtests = AbTestEngine::new(repository.clone());
        let dispatcher = WorkflowDispatcher::new(default_workflow_factory(Arc::clone(&registry)));

        RuleService {
            config,
            repository,
            registry,
            log_sink,
            versions,
            abtests,
            dispatcher,
            monitor: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    /// Replace the workflow handler factory (injection point for custom
    /// stages).
    pub fn with_workflow_factory(mut self, factory: Arc<dyn HandlerFactory>) -> Self {
        self.dispatcher = WorkflowDispatcher::new(factory);
        self
    }

    /// The registry, for advanced embedders.
    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// The backing repository.
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate one record through the current ruleset generation.
    pub fn execute(
        &self,
        data: &serde_json::Value,
        options: &ExecuteOptions,
        cancel: &CancelToken,
    ) -> EngineResult<ExecutionResult> {
        let started = Instant::now();
        let execution_id = Uuid::new_v4();
        let correlation_id = options
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let Some(record) = DataRecord::from_json(data) else {
            let err = EngineError::InvalidInput("input data must be a JSON object".to_string());
            if !options.dry_run {
                self.log_failure(
                    execution_id,
                    &correlation_id,
                    options.ruleset_id.clone(),
                    data.clone(),
                    started,
                    &err,
                    None,
                );
            }
            return Err(err);
        };

        // Pin one generation for the whole request.
        let snapshot = self.registry.snapshot();
        let mut view = snapshot.ruleset_view(options.ruleset_id.as_deref());
        let ab = self.resolve_ab_variant(&snapshot, &mut view, &record, options, &correlation_id);

        let output = pipeline::execute(&view, &record, options.dry_run, cancel)
            .map_err(EngineError::from)?;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        if !options.dry_run {
            self.log_sink.record(ExecutionRecord {
                execution_id,
                timestamp: Utc::now(),
                correlation_id: correlation_id.clone(),
                ruleset_id: options.ruleset_id.clone(),
                input: data.clone(),
                total_points: output.total_points,
                pattern_result: output.pattern_result.clone(),
                action_recommendation: output.action_recommendation.clone(),
                duration_ms,
                success: true,
                error: None,
                ab_test_id: ab.as_ref().map(|a| a.test_id.clone()),
                ab_test_variant: ab.as_ref().map(|a| a.variant),
            });
            if let Some(assignment) = &ab {
                let converted = output.action_recommendation.is_some();
                if let Err(e) = self.abtests.record_execution(
                    &assignment.test_id,
                    assignment.variant,
                    converted,
                ) {
                    warn!(test_id = %assignment.test_id, error = %e, "failed to record A/B outcome");
                }
            }
        }

        Ok(ExecutionResult {
            execution_id,
            correlation_id,
            total_points: output.total_points,
            pattern_result: output.pattern_result,
            action_recommendation: output.action_recommendation,
            duration_ms,
            dry_run: output.dry_run,
            ab_test: ab,
        })
    }

    /// Evaluate many records through a fixed-size worker pool.
    ///
    /// Results are ordered by input index; a single failing record never
    /// aborts the batch. A/B substitution is skipped: batch records carry
    /// no stable assignment key.
    pub fn execute_batch(
        &self,
        data_list: Vec<serde_json::Value>,
        options: &BatchOptions,
        cancel: &CancelToken,
    ) -> EngineResult<BatchResult> {
        let mut options = options.clone();
        if options.max_workers.is_none() && self.config.execution.default_max_workers > 0 {
            options.max_workers = Some(self.config.execution.default_max_workers);
        }

        let snapshot = self.registry.snapshot();
        let view = snapshot.ruleset_view(None);
        let batch_correlation = Uuid::new_v4();
        let dry_run = options.dry_run;

        let result = executor::run_batch(data_list, &options, cancel, |json| {
            let item_started = Instant::now();
            let Some(record) = DataRecord::from_json(json) else {
                let err = EngineError::InvalidInput("input data must be a JSON object".to_string());
                if !dry_run {
                    self.log_failure(
                        Uuid::new_v4(),
                        &batch_correlation.to_string(),
                        None,
                        json.clone(),
                        item_started,
                        &err,
                        None,
                    );
                }
                return Err((err.to_string(), err.kind().to_string()));
            };

            match pipeline::execute(&view, &record, dry_run, cancel) {
                Ok(output) => {
                    if !dry_run {
                        self.log_sink.record(ExecutionRecord {
                            execution_id: Uuid::new_v4(),
                            timestamp: Utc::now(),
                            correlation_id: batch_correlation.to_string(),
                            ruleset_id: None,
                            input: json.clone(),
                            total_points: output.total_points,
                            pattern_result: output.pattern_result.clone(),
                            action_recommendation: output.action_recommendation.clone(),
                            duration_ms: item_started.elapsed().as_secs_f64() * 1000.0,
                            success: true,
                            error: None,
                            ab_test_id: None,
                            ab_test_variant: None,
                        });
                    }
                    Ok((
                        output.total_points,
                        output.pattern_result,
                        output.action_recommendation,
                    ))
                }
                Err(e) => {
                    let err = EngineError::from(e);
                    Err((err.to_string(), err.kind().to_string()))
                }
            }
        })?;

        Ok(result)
    }

    /// Parse, schedule and execute a DMN document.
    pub fn execute_dmn(
        &self,
        source: &DmnSource,
        data: &serde_json::Value,
        options: &ExecuteOptions,
        cancel: &CancelToken,
    ) -> EngineResult<DmnExecutionResult> {
        let started = Instant::now();
        let execution_id = Uuid::new_v4();
        let correlation_id = options
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let content = match source {
            DmnSource::Content(content) => content.clone(),
            DmnSource::File(path) => std::fs::read_to_string(path)
                .map_err(|e| EngineError::Storage(crate::repository::RepositoryError::Io(e)))?,
        };

        let record = DataRecord::from_json(data)
            .ok_or_else(|| EngineError::InvalidInput("input data must be a JSON object".to_string()))?;

        let output: DmnOutput =
            dmn::execute_source(&content, &record, options.dry_run, cancel).map_err(EngineError::from)?;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        if !options.dry_run {
            self.log_sink.record(ExecutionRecord {
                execution_id,
                timestamp: Utc::now(),
                correlation_id: correlation_id.clone(),
                ruleset_id: None,
                input: data.clone(),
                total_points: output.total_points,
                pattern_result: output.pattern_result.clone(),
                action_recommendation: None,
                duration_ms,
                success: true,
                error: None,
                ab_test_id: None,
                ab_test_variant: None,
            });
        }

        Ok(DmnExecutionResult {
            execution_id,
            correlation_id,
            total_points: output.total_points,
            pattern_result: output.pattern_result,
            enriched_data: output.record.to_json(),
            decisions: output
                .decisions
                .into_iter()
                .map(|d| DecisionSummary {
                    decision_id: d.decision_id,
                    decision_name: d.decision_name,
                    pattern: d.pattern,
                    points: d.points,
                    enrichments: d
                        .enrichments
                        .into_iter()
                        .map(|(label, value)| (label, value.to_json()))
                        .collect(),
                })
                .collect(),
            cycle: output.cycle,
            duration_ms,
            dry_run: output.dry_run,
        })
    }

    /// Run a named multi-stage workflow over a record.
    pub fn execute_workflow(
        &self,
        process_name: &str,
        stages: &[String],
        data: &serde_json::Value,
    ) -> EngineResult<WorkflowExecutionResult> {
        let record = DataRecord::from_json(data)
            .ok_or_else(|| EngineError::InvalidInput("input data must be a JSON object".to_string()))?;
        let outcome: WorkflowOutcome = self.dispatcher.dispatch(process_name, stages, record)?;
        Ok(WorkflowExecutionResult {
            process_name: outcome.process_name,
            data: outcome.data.to_json(),
            stages: outcome.stages,
            duration_ms: outcome.duration.as_secs_f64() * 1000.0,
        })
    }

    // ------------------------------------------------------------------
    // Registry administration
    // ------------------------------------------------------------------

    /// Transactionally reload the catalog from the repository.
    pub fn reload(&self) -> EngineResult<u64> {
        Ok(self.registry.reload()?)
    }

    /// Validate the repository catalog without installing it.
    pub fn validate(&self) -> ValidationReport {
        self.registry.validate()
    }

    /// Subscribe to registry change events.
    pub fn subscribe(&self) -> Subscription {
        self.registry.subscribe()
    }

    /// Start the background reload monitor (no-op when the configured
    /// interval is zero or a monitor is already running).
    pub fn start_monitoring(&self) -> bool {
        let interval = self.config.registry.monitor_interval_secs;
        if interval == 0 {
            return false;
        }
        let mut slot = self.monitor.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(ReloadMonitor::spawn(
            Arc::clone(&self.registry),
            Duration::from_secs(interval),
        ));
        true
    }

    /// Stop the background reload monitor.
    pub fn stop_monitoring(&self) -> bool {
        self.monitor.lock().take().is_some()
    }

    /// Service status for the health endpoint.
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            registry: self.registry.status(),
            fresh: self.registry.is_fresh(Duration::from_secs(
                self.config.registry.staleness_threshold_secs,
            )),
            uptime_secs: self.started_at.elapsed().as_secs(),
            execution_log_dropped: self.log_sink.dropped(),
        }
    }

    /// Block until enqueued execution records have been persisted
    /// (tests and graceful shutdown).
    pub fn flush_logs(&self) {
        self.log_sink.flush();
    }

    // ------------------------------------------------------------------
    // Rule management (write-through with versioning)
    // ------------------------------------------------------------------

    /// Add a rule: validate in the registry, persist, record a version.
    pub fn create_rule(&self, rule: Rule, reason: &str, author: &str) -> EngineResult<u64> {
        let mut rule = rule;
        rule.updated_at = Some(Utc::now());
        let version = self.registry.add_rule(rule.clone())?;
        self.repository.upsert_rule(&rule)?;
        self.versions.record_change(&rule, reason, author)?;
        Ok(version)
    }

    /// Update a rule: validate in the registry, persist, record a version.
    pub fn update_rule(&self, rule: Rule, reason: &str, author: &str) -> EngineResult<u64> {
        let mut rule = rule;
        rule.updated_at = Some(Utc::now());
        let version = self.registry.update_rule(rule.clone())?;
        self.repository.upsert_rule(&rule)?;
        self.versions.record_change(&rule, reason, author)?;
        Ok(version)
    }

    /// Remove a rule from the registry and the repository.
    pub fn delete_rule(&self, rule_id: &str) -> EngineResult<u64> {
        let version = self.registry.remove_rule(rule_id)?;
        self.repository.delete_rule(rule_id)?;
        Ok(version)
    }

    /// All versions of a rule, oldest first.
    pub fn list_versions(&self, rule_id: &str) -> EngineResult<Vec<RuleVersion>> {
        Ok(self.versions.list(rule_id)?)
    }

    /// A specific version of a rule.
    pub fn get_version(&self, rule_id: &str, version: u64) -> EngineResult<RuleVersion> {
        Ok(self.versions.get(rule_id, version)?)
    }

    /// Diff two versions of a rule.
    pub fn compare_versions(
        &self,
        rule_id: &str,
        from: u64,
        to: u64,
    ) -> EngineResult<Vec<FieldDiff>> {
        Ok(self.versions.compare(rule_id, from, to)?)
    }

    /// Roll a rule back to a prior version and install the restored
    /// snapshot into the serving registry.
    pub fn rollback_rule(
        &self,
        rule_id: &str,
        version: u64,
        reason: &str,
        author: &str,
    ) -> EngineResult<RuleVersion> {
        let restored = self.versions.rollback(rule_id, version, reason, author)?;
        let rule = restored.snapshot.clone();
        if self.registry.snapshot().contains(rule_id) {
            self.registry.update_rule(rule.clone())?;
        } else {
            self.registry.add_rule(rule.clone())?;
        }
        self.repository.upsert_rule(&rule)?;
        Ok(restored)
    }

    // ------------------------------------------------------------------
    // A/B testing
    // ------------------------------------------------------------------

    /// Create an A/B test in draft status.
    pub fn create_ab_test(&self, spec: AbTestSpec) -> EngineResult<AbTest> {
        Ok(self.abtests.create_test(spec)?)
    }

    /// Start a draft test.
    pub fn start_ab_test(&self, test_id: &str) -> EngineResult<AbTest> {
        Ok(self.abtests.start_test(test_id)?)
    }

    /// Complete a running test.
    pub fn stop_ab_test(&self, test_id: &str, winner: Option<Variant>) -> EngineResult<AbTest> {
        Ok(self.abtests.stop_test(test_id, winner)?)
    }

    /// Assign a key to a variant (`None` unless the test is running).
    pub fn assign_variant(
        &self,
        test_id: &str,
        assignment_key: &str,
    ) -> EngineResult<Option<Variant>> {
        Ok(self.abtests.assign(test_id, assignment_key)?)
    }

    /// Metrics and significance report for a test.
    pub fn ab_metrics(&self, test_id: &str) -> EngineResult<AbTestMetrics> {
        Ok(self.abtests.metrics(test_id)?)
    }

    /// All A/B tests.
    pub fn ab_tests(&self) -> EngineResult<Vec<AbTest>> {
        Ok(self.abtests.list()?)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Find a running test targeting a rule in the evaluated view and
    /// substitute the assigned variant's version snapshot.
    ///
    /// Dry runs resolve the variant through the non-persisting peek path,
    /// so they never write an assignment or move counters. Substitution
    /// failures degrade to serving the current rule with a warning; the
    /// assignment itself is still reported.
    fn resolve_ab_variant(
        &self,
        snapshot: &crate::registry::RegistrySnapshot,
        view: &mut CompiledRuleset,
        record: &DataRecord,
        options: &ExecuteOptions,
        correlation_id: &str,
    ) -> Option<AbAssignment> {
        let mut running: Vec<AbTest> = match self.abtests.list() {
            Ok(tests) => tests
                .into_iter()
                .filter(|t| t.status == crate::abtest::AbTestStatus::Running)
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list A/B tests, serving current rules");
                return None;
            }
        };
        running.sort_by(|a, b| a.test_id.cmp(&b.test_id));

        let test = running
            .into_iter()
            .find(|t| view.rules.iter().any(|r| r.rule_id == t.rule_id))?;

        let key = options
            .assignment_key
            .clone()
            .or_else(|| options.correlation_id.clone().map(|_| correlation_id.to_string()))
            .unwrap_or_else(|| record_fingerprint(record));

        let resolved = if options.dry_run {
            self.abtests.peek(&test.test_id, &key)
        } else {
            self.abtests.assign(&test.test_id, &key)
        };
        let variant = match resolved {
            Ok(Some(variant)) => variant,
            Ok(None) => return None,
            Err(e) => {
                warn!(test_id = %test.test_id, error = %e, "A/B assignment failed");
                return None;
            }
        };

        let assignment = AbAssignment {
            test_id: test.test_id.clone(),
            variant,
        };

        let version_str = match variant {
            Variant::A => &test.variant_a,
            Variant::B => &test.variant_b,
        };
        let Ok(version_number) = version_str.parse::<u64>() else {
            warn!(test_id = %test.test_id, version = %version_str, "unparseable variant version, serving current rule");
            return Some(assignment);
        };

        match self.versions.get(&test.rule_id, version_number) {
            Ok(row) => match evaluator::compile(&row.snapshot, snapshot.conditions()) {
                Ok(compiled) => {
                    let compiled = Arc::new(compiled);
                    for slot in view.rules.iter_mut() {
                        if slot.rule_id == test.rule_id {
                            *slot = Arc::clone(&compiled);
                        }
                    }
                    view.rules.sort_by(|a, b| {
                        a.priority
                            .cmp(&b.priority)
                            .then_with(|| a.rule_id.cmp(&b.rule_id))
                    });
                }
                Err(e) => {
                    warn!(test_id = %test.test_id, error = %e, "variant snapshot failed to compile, serving current rule");
                }
            },
            Err(e) => {
                warn!(test_id = %test.test_id, error = %e, "variant version not found, serving current rule");
            }
        }

        Some(assignment)
    }

    fn log_failure(
        &self,
        execution_id: Uuid,
        correlation_id: &str,
        ruleset_id: Option<String>,
        input: serde_json::Value,
        started: Instant,
        error: &EngineError,
        ab: Option<&AbAssignment>,
    ) {
        self.log_sink.record(ExecutionRecord {
            execution_id,
            timestamp: Utc::now(),
            correlation_id: correlation_id.to_string(),
            ruleset_id,
            input,
            total_points: 0.0,
            pattern_result: String::new(),
            action_recommendation: None,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            success: false,
            error: Some(format!("{}: {}", error.kind(), error)),
            ab_test_id: ab.map(|a| a.test_id.clone()),
            ab_test_variant: ab.map(|a| a.variant),
        });
    }
}

/// Stable fingerprint of a record, used as the assignment key of last
/// resort. `serde_json` maps are ordered, so the rendering is canonical.
fn record_fingerprint(record: &DataRecord) -> String {
    let rendered = record.to_json().to_string();
    let mut hasher = Sha256::new();
    hasher.update(rendered.as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// The built-in workflow stages: `evaluate` runs the current ruleset and
/// merges the aggregate into the record; `passthrough` is the explicit
/// fall-through stage.
fn default_workflow_factory(registry: Arc<RuleRegistry>) -> Arc<dyn HandlerFactory> {
    let evaluate = {
        let registry = Arc::clone(&registry);
        Arc::new(move |mut data: DataRecord| -> crate::workflow::WorkflowResult<DataRecord> {
            let view = registry.ruleset_view(None);
            let output = pipeline::execute(&view, &data, false, &CancelToken::new()).map_err(
                |e| crate::workflow::WorkflowError::StageFailed {
                    stage: "evaluate".to_string(),
                    message: e.to_string(),
                },
            )?;
            data.insert("total_points", Value::Float(output.total_points));
            data.insert("pattern_result", Value::Str(output.pattern_result));
            data.insert(
                "action_recommendation",
                output
                    .action_recommendation
                    .map(Value::Str)
                    .unwrap_or(Value::Null),
            );
            Ok(data)
        }) as Arc<dyn crate::workflow::StageHandler>
    };
    let passthrough = Arc::new(
        |data: DataRecord| -> crate::workflow::WorkflowResult<DataRecord> { Ok(data) },
    ) as Arc<dyn crate::workflow::StageHandler>;

    Arc::new(
        MapHandlerFactory::new()
            .register("evaluate", evaluate)
            .register("passthrough", passthrough),
    )
}

// Change events are re-exported for transport layers bridging
// subscriptions onto their own channels.
pub use crate::registry::ChangeEvent as RegistryChangeEvent;
