//! Evaluation Handlers
//!
//! `execute`, `execute/batch`, `execute/dmn` and `workflows/execute`.

use crate::api::dto::{ApiResponse, BatchRequest, DmnRequest, ExecuteRequest, WorkflowRequest};
use crate::api::error::RestError;
use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::executor::{BatchOptions, BatchResult};
use crate::service::{
    DmnExecutionResult, DmnSource, ExecuteOptions, ExecutionResult, RuleService,
    WorkflowExecutionResult,
};
use axum::{Extension, Json};
use std::sync::Arc;

async fn blocking<T, F>(task: F) -> Result<T, RestError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| RestError::from(EngineError::Internal(e.to_string())))?
        .map_err(RestError::from)
}

/// `POST /v1/execute`
pub async fn execute(
    Extension(service): Extension<Arc<RuleService>>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ApiResponse<ExecutionResult>>, RestError> {
    let result = blocking(move || {
        let options = ExecuteOptions {
            dry_run: request.dry_run,
            ruleset_id: request.ruleset_id,
            correlation_id: request.correlation_id,
            assignment_key: request.assignment_key,
        };
        service.execute(&request.data, &options, &CancelToken::new())
    })
    .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// `POST /v1/execute/batch`
pub async fn execute_batch(
    Extension(service): Extension<Arc<RuleService>>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<ApiResponse<BatchResult>>, RestError> {
    let result = blocking(move || {
        let options = BatchOptions {
            max_workers: request.max_workers,
            dry_run: request.dry_run,
        };
        service.execute_batch(request.data_list, &options, &CancelToken::new())
    })
    .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// `POST /v1/execute/dmn`
pub async fn execute_dmn(
    Extension(service): Extension<Arc<RuleService>>,
    Json(request): Json<DmnRequest>,
) -> Result<Json<ApiResponse<DmnExecutionResult>>, RestError> {
    let source = match (&request.content, &request.file) {
        (Some(content), None) => DmnSource::Content(content.clone()),
        (None, Some(path)) => DmnSource::File(path.into()),
        _ => {
            return Err(RestError::bad_request(
                "exactly one of 'content' or 'file' must be provided",
            ))
        }
    };
    let result = blocking(move || {
        let options = ExecuteOptions {
            dry_run: request.dry_run,
            correlation_id: request.correlation_id,
            ..Default::default()
        };
        service.execute_dmn(&source, &request.data, &options, &CancelToken::new())
    })
    .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// `POST /v1/workflows/execute`
pub async fn execute_workflow(
    Extension(service): Extension<Arc<RuleService>>,
    Json(request): Json<WorkflowRequest>,
) -> Result<Json<ApiResponse<WorkflowExecutionResult>>, RestError> {
    let result = blocking(move || {
        service.execute_workflow(&request.process_name, &request.stages, &request.data)
    })
    .await?;
    Ok(Json(ApiResponse::success(result)))
}
