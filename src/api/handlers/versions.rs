//! Versioning Handlers
//!
//! List, fetch, compare and roll back rule versions.

use crate::api::dto::{ApiResponse, CompareQuery, RollbackRequest};
use crate::api::error::RestError;
use crate::error::EngineError;
use crate::service::RuleService;
use crate::versioning::{FieldDiff, RuleVersion};
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

/// `GET /v1/rules/{rule_id}/versions`
pub async fn list_versions(
    Extension(service): Extension<Arc<RuleService>>,
    Path(rule_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<RuleVersion>>>, RestError> {
    let versions = blocking(move || service.list_versions(&rule_id)).await?;
    Ok(Json(ApiResponse::success(versions)))
}

/// `GET /v1/rules/{rule_id}/versions/{version}`
pub async fn get_version(
    Extension(service): Extension<Arc<RuleService>>,
    Path((rule_id, version)): Path<(String, u64)>,
) -> Result<Json<ApiResponse<RuleVersion>>, RestError> {
    let row = blocking(move || service.get_version(&rule_id, version)).await?;
    Ok(Json(ApiResponse::success(row)))
}

/// `GET /v1/rules/{rule_id}/compare?from=&to=`
pub async fn compare_versions(
    Extension(service): Extension<Arc<RuleService>>,
    Path(rule_id): Path<String>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<ApiResponse<Vec<FieldDiff>>>, RestError> {
    let diff = blocking(move || service.compare_versions(&rule_id, query.from, query.to)).await?;
    Ok(Json(ApiResponse::success(diff)))
}

/// `POST /v1/rules/{rule_id}/rollback`
pub async fn rollback(
    Extension(service): Extension<Arc<RuleService>>,
    Path(rule_id): Path<String>,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<ApiResponse<RuleVersion>>, RestError> {
    let restored = blocking(move || {
        service.rollback_rule(&rule_id, request.version, &request.reason, &request.author)
    })
    .await?;
    Ok(Json(ApiResponse::success(restored)))
}
