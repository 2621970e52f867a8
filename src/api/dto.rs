//! HTTP API Data Transfer Objects
//!
//! Request/response envelopes for the REST handlers. Responses follow the
//! `{ "success": true, "data": … }` envelope.

use crate::abtest::Variant;
use serde::{Deserialize, Serialize};

/// Standard success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Always true for this envelope
    pub success: bool,
    /// Operation payload
    pub data: T,
}

impl<T> ApiResponse<T> {
    /// Wrap a payload.
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data,
        }
    }
}

/// `POST /v1/execute` request.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// Input record
    pub data: serde_json::Value,
    /// Diagnostic evaluation with no side effects
    #[serde(default)]
    pub dry_run: bool,
    /// Restrict to one ruleset
    #[serde(default)]
    pub ruleset_id: Option<String>,
    /// Correlation id; generated when absent
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Stable A/B assignment key
    #[serde(default)]
    pub assignment_key: Option<String>,
}

/// `POST /v1/execute/batch` request.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    /// Input records
    pub data_list: Vec<serde_json::Value>,
    /// Worker pool size
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Diagnostic evaluation with no side effects
    #[serde(default)]
    pub dry_run: bool,
}

/// `POST /v1/execute/dmn` request. Exactly one of `content`/`file` must
/// be set.
#[derive(Debug, Deserialize)]
pub struct DmnRequest {
    /// Inline DMN XML
    #[serde(default)]
    pub content: Option<String>,
    /// Path to a DMN XML file readable by the server
    #[serde(default)]
    pub file: Option<String>,
    /// Input record
    pub data: serde_json::Value,
    /// Diagnostic evaluation with no side effects
    #[serde(default)]
    pub dry_run: bool,
    /// Correlation id; generated when absent
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// `POST /v1/workflows/execute` request.
#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    /// Process name, echoed back
    pub process_name: String,
    /// Stage names in execution order
    pub stages: Vec<String>,
    /// Input record
    pub data: serde_json::Value,
}

/// `POST /v1/rules/{rule_id}/rollback` request.
#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    /// Version to restore
    pub version: u64,
    /// Change reason for the audit trail
    pub reason: String,
    /// Author for the audit trail
    #[serde(default = "default_author")]
    pub author: String,
}

fn default_author() -> String {
    "api".to_string()
}

/// `GET /v1/rules/{rule_id}/compare` query.
#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    /// Left version
    pub from: u64,
    /// Right version
    pub to: u64,
}

/// `POST /v1/abtests/{test_id}/stop` request.
#[derive(Debug, Default, Deserialize)]
pub struct StopTestRequest {
    /// Declared winner, if any
    #[serde(default)]
    pub winner: Option<Variant>,
}

/// `GET /v1/abtests/{test_id}/assignment` query.
#[derive(Debug, Deserialize)]
pub struct AssignmentQuery {
    /// Assignment key
    pub key: String,
}

/// Assignment response payload.
#[derive(Debug, Serialize)]
pub struct AssignmentDto {
    /// Test id
    pub test_id: String,
    /// Assigned variant; null when the test is not running
    pub variant: Option<Variant>,
}

/// Reload response payload.
#[derive(Debug, Serialize)]
pub struct ReloadDto {
    /// Registry version after the reload
    pub registry_version: u64,
}

/// Monitor toggle response payload.
#[derive(Debug, Serialize)]
pub struct MonitorDto {
    /// Whether the call changed the monitor state
    pub changed: bool,
    /// Whether the monitor is running now
    pub active: bool,
}
