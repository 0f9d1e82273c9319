//! Error types mapping to HTTP responses.
//!
//! Management routes answer with the envelope format. The OpenAI-compatible
//! `/v1` routes answer with a bare `{"detail": "..."}` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use lingmo_core::service::ServiceError;
use lingmo_core::synchronizer::SyncError;
use lingmo_types::error::{ConfigError, GatewayError, RegistryError, RepositoryError};

/// Management API error.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Unauthorized(String),
    Validation(String),
    /// The request was valid but the upstream could not satisfy it.
    Upstream(String),
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Invalid(msg) => AppError::Validation(msg),
            ServiceError::NotFound(id) => AppError::NotFound(format!("Model {id} not found")),
            ServiceError::Config(err) => err.into(),
            ServiceError::Repository(err) => err.into(),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(id) => AppError::NotFound(format!("Model {id} not found")),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => AppError::NotFound("Entity not found".to_string()),
            RepositoryError::Conflict(msg) => AppError::Validation(msg),
            other => {
                tracing::error!(error = %other, "Repository failure");
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Registry(err) => err.into(),
            SyncError::Unsupported(_) => AppError::Validation(e.to_string()),
            SyncError::Vendor { .. } => AppError::Upstream(e.to_string()),
            SyncError::Repository(err) => err.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

/// Error returned by the OpenAI-compatible endpoint.
#[derive(Debug)]
pub enum ChatError {
    Unauthorized(String),
    BadRequest(String),
    Unavailable(String),
}

impl From<GatewayError> for ChatError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Auth(msg) => ChatError::Unauthorized(msg),
            GatewayError::NoEligibleProvider(msg) => ChatError::Unavailable(msg),
            // Retries exhausted without a clean verdict; callers see the same 503.
            other => {
                tracing::warn!(error = %other, "Unexpected gateway failure");
                ChatError::Unavailable("no eligible model is available".to_string())
            }
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ChatError::Unauthorized(d) => (StatusCode::UNAUTHORIZED, d),
            ChatError::BadRequest(d) => (StatusCode::BAD_REQUEST, d),
            ChatError::Unavailable(d) => (StatusCode::SERVICE_UNAVAILABLE, d),
        };
        (status, axum::Json(json!({ "detail": detail }))).into_response()
    }
}
