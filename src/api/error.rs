//! HTTP API Error Types
//!
//! Maps the engine's closed error taxonomy onto status codes and a JSON
//! error envelope.

use crate::error::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// JSON error payload.
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Stable error kind
    pub code: String,
    /// Human-readable message
    pub message: String,
}

/// HTTP API error returned from handlers.
#[derive(Debug)]
pub struct RestError {
    /// HTTP status
    pub status: StatusCode,
    /// Payload
    pub error: ApiError,
}

impl RestError {
    /// 400 with a custom message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        RestError {
            status: StatusCode::BAD_REQUEST,
            error: ApiError {
                code: "InputValidationError".to_string(),
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.error
        }));
        (self.status, body).into_response()
    }
}

impl From<EngineError> for RestError {
    fn from(err: EngineError) -> Self {
        let status = match err.kind() {
            "InputValidationError" | "DMNParseError" | "WorkflowStageUnknown"
            | "CancelledError" => StatusCode::BAD_REQUEST,
            "RuleCompileError" => StatusCode::UNPROCESSABLE_ENTITY,
            "NotFoundError" => StatusCode::NOT_FOUND,
            "ConflictError" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        RestError {
            status,
            error: ApiError {
                code: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }
}
