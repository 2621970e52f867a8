//! A/B Testing Handlers
//!
//! Create, start, stop, assign and report on experiments.

use crate::abtest::{AbTest, AbTestMetrics, AbTestSpec};
use crate::api::dto::{ApiResponse, AssignmentDto, AssignmentQuery, StopTestRequest};
use crate::api::error::RestError;
use crate::error::EngineError;
use crate::service::RuleService;
use axum::extract::{Path, Query};
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

/// `POST /v1/abtests`
pub async fn create_test(
    Extension(service): Extension<Arc<RuleService>>,
    Json(spec): Json<AbTestSpec>,
) -> Result<Json<ApiResponse<AbTest>>, RestError> {
    let test = blocking(move || service.create_ab_test(spec)).await?;
    Ok(Json(ApiResponse::success(test)))
}

/// `GET /v1/abtests`
pub async fn list_tests(
    Extension(service): Extension<Arc<RuleService>>,
) -> Result<Json<ApiResponse<Vec<AbTest>>>, RestError> {
    let tests = blocking(move || service.ab_tests()).await?;
    Ok(Json(ApiResponse::success(tests)))
}

/// `POST /v1/abtests/{test_id}/start`
pub async fn start_test(
    Extension(service): Extension<Arc<RuleService>>,
    Path(test_id): Path<String>,
) -> Result<Json<ApiResponse<AbTest>>, RestError> {
    let test = blocking(move || service.start_ab_test(&test_id)).await?;
    Ok(Json(ApiResponse::success(test)))
}

/// `POST /v1/abtests/{test_id}/stop`
pub async fn stop_test(
    Extension(service): Extension<Arc<RuleService>>,
    Path(test_id): Path<String>,
    Json(request): Json<StopTestRequest>,
) -> Result<Json<ApiResponse<AbTest>>, RestError> {
    let test = blocking(move || service.stop_ab_test(&test_id, request.winner)).await?;
    Ok(Json(ApiResponse::success(test)))
}

/// `GET /v1/abtests/{test_id}/assignment?key=`
pub async fn assignment(
    Extension(service): Extension<Arc<RuleService>>,
    Path(test_id): Path<String>,
    Query(query): Query<AssignmentQuery>,
) -> Result<Json<ApiResponse<AssignmentDto>>, RestError> {
    let response_test_id = test_id.clone();
    let variant = blocking(move || service.assign_variant(&test_id, &query.key)).await?;
    Ok(Json(ApiResponse::success(AssignmentDto {
        test_id: response_test_id,
        variant,
    })))
}

/// `GET /v1/abtests/{test_id}/metrics`
pub async fn metrics(
    Extension(service): Extension<Arc<RuleService>>,
    Path(test_id): Path<String>,
) -> Result<Json<ApiResponse<AbTestMetrics>>, RestError> {
    let metrics = blocking(move || service.ab_metrics(&test_id)).await?;
    Ok(Json(ApiResponse::success(metrics)))
}
