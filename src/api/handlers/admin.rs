//! Admin Handlers
//!
//! Health, status, reload, validation and monitor control.

use crate::api::dto::{ApiResponse, MonitorDto, ReloadDto};
use crate::api::error::RestError;
use crate::error::EngineError;
use crate::registry::ValidationReport;
use crate::service::{RuleService, ServiceStatus};
use axum::{Extension, Json};
use std::sync::Arc;

/// `GET /health` — liveness probe, always public.
pub async fn health(
    Extension(service): Extension<Arc<RuleService>>,
) -> Json<ApiResponse<serde_json::Value>> {
    let status = service.status();
    Json(ApiResponse::success(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "registry_version": status.registry.registry_version,
    })))
}

/// `GET /v1/status`
pub async fn status(
    Extension(service): Extension<Arc<RuleService>>,
) -> Json<ApiResponse<ServiceStatus>> {
    Json(ApiResponse::success(service.status()))
}

/// `POST /v1/admin/reload`
pub async fn reload(
    Extension(service): Extension<Arc<RuleService>>,
) -> Result<Json<ApiResponse<ReloadDto>>, RestError> {
    let registry_version = tokio::task::spawn_blocking(move || service.reload())
        .await
        .map_err(|e| RestError::from(EngineError::Internal(e.to_string())))?
        .map_err(RestError::from)?;
    Ok(Json(ApiResponse::success(ReloadDto { registry_version })))
}

/// `GET /v1/admin/validate`
pub async fn validate(
    Extension(service): Extension<Arc<RuleService>>,
) -> Result<Json<ApiResponse<ValidationReport>>, RestError> {
    let report = tokio::task::spawn_blocking(move || service.validate())
        .await
        .map_err(|e| RestError::from(EngineError::Internal(e.to_string())))?;
    Ok(Json(ApiResponse::success(report)))
}

/// `POST /v1/admin/monitor/start`
pub async fn start_monitor(
    Extension(service): Extension<Arc<RuleService>>,
) -> Json<ApiResponse<MonitorDto>> {
    let changed = service.start_monitoring();
    let active = service.status().registry.monitoring_active;
    Json(ApiResponse::success(MonitorDto { changed, active }))
}

/// `POST /v1/admin/monitor/stop`
pub async fn stop_monitor(
    Extension(service): Extension<Arc<RuleService>>,
) -> Json<ApiResponse<MonitorDto>> {
    let changed = service.stop_monitoring();
    let active = service.status().registry.monitoring_active;
    Json(ApiResponse::success(MonitorDto { changed, active }))
}
