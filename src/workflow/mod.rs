//! # Workflow Chain Dispatcher
//!
//! Chain-of-responsibility over named stages. Each stage name resolves to
//! a handler through an injected factory; handlers run sequentially, each
//! receiving the previous stage's output record. A built-in fall-through
//! terminator ends every chain, and the whole dispatcher is re-entrant
//! across concurrent workflow executions.

use crate::value::DataRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Workflow errors.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A stage name did not resolve to a handler
    #[error("unknown workflow stage '{0}'")]
    UnknownStage(String),

    /// A handler failed
    #[error("stage '{stage}' failed: {message}")]
    StageFailed {
        /// Stage that failed
        stage: String,
        /// Handler-provided message
        message: String,
    },
}

/// Result alias for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// A single processing stage.
///
/// Handlers are values: no inheritance, one operation. They must be
/// `Send + Sync` because concurrent workflows share them.
pub trait StageHandler: Send + Sync {
    /// Transform the record and hand it to the next stage.
    fn handle(&self, data: DataRecord) -> WorkflowResult<DataRecord>;
}

impl<F> StageHandler for F
where
    F: Fn(DataRecord) -> WorkflowResult<DataRecord> + Send + Sync,
{
    fn handle(&self, data: DataRecord) -> WorkflowResult<DataRecord> {
        self(data)
    }
}

/// Resolves stage names to handlers.
pub trait HandlerFactory: Send + Sync {
    /// The handler for a stage name, `None` when unknown.
    fn resolve(&self, stage: &str) -> Option<Arc<dyn StageHandler>>;
}

/// Factory over a static name → handler map.
#[derive(Default)]
pub struct MapHandlerFactory {
    handlers: HashMap<String, Arc<dyn StageHandler>>,
}

impl MapHandlerFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        MapHandlerFactory::default()
    }

    /// Register a handler under a stage name.
    pub fn register(
        mut self,
        stage: impl Into<String>,
        handler: Arc<dyn StageHandler>,
    ) -> Self {
        self.handlers.insert(stage.into(), handler);
        self
    }
}

impl HandlerFactory for MapHandlerFactory {
    fn resolve(&self, stage: &str) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(stage).cloned()
    }
}

/// Per-stage trace entry.
#[derive(Debug, Clone, Serialize)]
pub struct StageTrace {
    /// Stage name
    pub stage: String,
    /// Wall time spent in the handler, microseconds
    pub duration_micros: u64,
}

/// Result of one workflow execution.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    /// Process name the caller supplied
    pub process_name: String,
    /// Record after the final stage
    pub data: DataRecord,
    /// Stages in execution order
    pub stages: Vec<StageTrace>,
    /// Wall time of the whole chain
    pub duration: Duration,
}

/// The dispatcher: resolves the stage list up front, then runs the chain.
pub struct WorkflowDispatcher {
    factory: Arc<dyn HandlerFactory>,
}

impl WorkflowDispatcher {
    /// Create a dispatcher over a handler factory.
    pub fn new(factory: Arc<dyn HandlerFactory>) -> Self {
        WorkflowDispatcher { factory }
    }

    /// Execute the named stages in order.
    ///
    /// The full chain is resolved before any handler runs, so an unknown
    /// stage fails the workflow without side effects.
    pub fn dispatch(
        &self,
        process_name: &str,
        stages: &[String],
        data: DataRecord,
    ) -> WorkflowResult<WorkflowOutcome> {
        let started = Instant::now();

        let mut chain: Vec<(String, Arc<dyn StageHandler>)> = Vec::with_capacity(stages.len());
        for stage in stages {
            let handler = self
                .factory
                .resolve(stage)
                .ok_or_else(|| WorkflowError::UnknownStage(stage.clone()))?;
            chain.push((stage.clone(), handler));
        }

        let mut data = data;
        let mut traces = Vec::with_capacity(chain.len());
        for (stage, handler) in chain {
            let stage_started = Instant::now();
            data = handler.handle(data)?;
            traces.push(StageTrace {
                stage,
                duration_micros: stage_started.elapsed().as_micros() as u64,
            });
        }

        // Fall-through terminator: the record passes out unchanged.
        Ok(WorkflowOutcome {
            process_name: process_name.to_string(),
            data,
            stages: traces,
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn set_stage(key: &'static str, value: i64) -> Arc<dyn StageHandler> {
        Arc::new(move |mut data: DataRecord| -> WorkflowResult<DataRecord> {
            data.insert(key, Value::Int(value));
            Ok(data)
        })
    }

    fn factory() -> WorkflowDispatcher {
        let factory = MapHandlerFactory::new()
            .register("enrich", set_stage("enriched", 1))
            .register("score", set_stage("scored", 2))
            .register(
                "fail",
                Arc::new(|_data: DataRecord| -> WorkflowResult<DataRecord> {
                    Err(WorkflowError::StageFailed {
                        stage: "fail".to_string(),
                        message: "boom".to_string(),
                    })
                }),
            );
        WorkflowDispatcher::new(Arc::new(factory))
    }

    #[test]
    fn test_stages_run_in_order_and_thread_data() {
        let dispatcher = factory();
        let outcome = dispatcher
            .dispatch(
                "intake",
                &["enrich".to_string(), "score".to_string()],
                DataRecord::new(),
            )
            .unwrap();

        assert_eq!(outcome.process_name, "intake");
        assert_eq!(outcome.data.get("enriched"), Some(&Value::Int(1)));
        assert_eq!(outcome.data.get("scored"), Some(&Value::Int(2)));
        let order: Vec<&str> = outcome.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(order, vec!["enrich", "score"]);
    }

    #[test]
    fn test_unknown_stage_fails_before_any_handler_runs() {
        let dispatcher = factory();
        let err = dispatcher
            .dispatch(
                "intake",
                &["enrich".to_string(), "nope".to_string()],
                DataRecord::new(),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownStage(name) if name == "nope"));
    }

    #[test]
    fn test_stage_failure_propagates() {
        let dispatcher = factory();
        let err = dispatcher
            .dispatch("intake", &["fail".to_string()], DataRecord::new())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::StageFailed { .. }));
    }

    #[test]
    fn test_empty_stage_list_falls_through() {
        let dispatcher = factory();
        let mut data = DataRecord::new();
        data.insert("kept", Value::Bool(true));
        let outcome = dispatcher.dispatch("noop", &[], data.clone()).unwrap();
        assert_eq!(outcome.data, data);
        assert!(outcome.stages.is_empty());
    }

    #[test]
    fn test_dispatcher_is_reentrant() {
        let dispatcher = Arc::new(factory());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(std::thread::spawn(move || {
                dispatcher
                    .dispatch(
                        "concurrent",
                        &["enrich".to_string(), "score".to_string()],
                        DataRecord::new(),
                    )
                    .unwrap()
            }));
        }
        for handle in handles {
            let outcome = handle.join().unwrap();
            assert_eq!(outcome.data.get("scored"), Some(&Value::Int(2)));
        }
    }
}
