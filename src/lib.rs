//! # RuleFlow Rules Engine
//!
//! A declarative business rules service: load a catalog of conditions,
//! rules and action patterns, evaluate them against arbitrary input
//! records, aggregate scores, and route records to recommended actions.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Repository (file / memory)
//!     ↓
//! [Registry]            → validated, compiled generations (hot-reload)
//!     ↓
//! [Evaluator]           → one rule, one record, one predicate
//!     ↓
//! [Pipeline]            → priority order, scoring, pattern, recommendation
//!     ↓
//! [Batch Executor]      → worker pool fan-out, input-order results
//!
//! DMN XML ──[DMN Compiler]── rows become compiled rules, decisions
//!                            execute in topological order
//!
//! [Versioning / A/B]    → immutable snapshots, stable variant assignment
//! [Workflow Dispatcher] → chain-of-responsibility stage handlers
//! ```
//!
//! ## Usage
//!
//! ### Basic evaluation
//! ```rust,ignore
//! use ruleflow::{CancelToken, Config, ExecuteOptions, RuleService};
//!
//! let service = RuleService::from_config(Config::load()?)?;
//! let result = service.execute(
//!     &serde_json::json!({"issue": 35, "title": "Superman", "publisher": "DC"}),
//!     &ExecuteOptions::default(),
//!     &CancelToken::new(),
//! )?;
//! println!("{} -> {:?}", result.pattern_result, result.action_recommendation);
//! ```
//!
//! ### DMN decision tables
//! ```rust,ignore
//! use ruleflow::service::DmnSource;
//!
//! let result = service.execute_dmn(
//!     &DmnSource::File("decisions.dmn".into()),
//!     &serde_json::json!({"can": "giap", "chi": "ty"}),
//!     &Default::default(),
//!     &CancelToken::new(),
//! )?;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `value` | Tagged-union record values, absent-key semantics |
//! | `model` | Conditions, rules, rulesets, the JSON file format |
//! | `evaluator` | Operator vocabulary, compile + evaluate |
//! | `pipeline` | Ordering, scoring, pattern assembly, dry run |
//! | `dmn` | XML decision tables, FEEL subset, Kahn scheduling |
//! | `registry` | Hot-reload generations, change events, monitor |
//! | `repository` | Persistence contract, file/memory backends |
//! | `execlog` | Bounded fire-and-forget execution logging |
//! | `versioning` | Immutable snapshots, rollback, diffs |
//! | `abtest` | Deterministic assignment, chi-square significance |
//! | `executor` | Fixed-size batch worker pool |
//! | `workflow` | Chain-of-responsibility stage dispatch |
//! | `service` | The facade the transport layer calls |
//! | `api` | Thin axum surface + change-event WebSocket |

pub mod abtest;
pub mod api;
pub mod cancel;
pub mod config;
pub mod dmn;
pub mod error;
pub mod evaluator;
pub mod execlog;
pub mod executor;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod repository;
pub mod service;
pub mod value;
pub mod versioning;
pub mod workflow;

pub use crate::cancel::CancelToken;
pub use crate::config::{BackendKind, Config, Environment};
pub use crate::error::{EngineError, EngineResult};
pub use crate::evaluator::{CompileError, CompiledRule};
pub use crate::model::{Condition, Operator, Rule, RuleStatus, Ruleset, RulesFile};
pub use crate::registry::{ChangeEvent, RegistryStatus, RuleRegistry, Subscription};
pub use crate::repository::{FileRepository, MemoryRepository, Repository};
pub use crate::service::{ExecuteOptions, ExecutionResult, RuleService};
pub use crate::value::{DataRecord, Value};
