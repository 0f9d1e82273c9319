//! Runtime settings handlers.
//!
//! Writes are validated before they are stored; a rejected value leaves the
//! previous one in force. The gateway API key is always masked on read.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    /// String or number; numbers are stored in their decimal form.
    pub value: serde_json::Value,
}

/// GET /api/config
pub async fn get_config(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<ApiResponse<BTreeMap<String, String>>>, AppError> {
    let start = Instant::now();
    Ok(Json(ApiResponse::timed(
        state.settings_service.public_map(),
        start,
    )))
}

/// PUT /api/config/{key}
pub async fn update_config(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(key): Path<String>,
    Json(body): Json<UpdateConfigRequest>,
) -> Result<Json<ApiResponse<BTreeMap<String, String>>>, AppError> {
    let start = Instant::now();
    let raw = match body.value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(AppError::Validation(format!(
                "value for '{key}' must be a string or number, got {other}"
            )));
        }
    };
    let updated = state.settings_service.update(&key, &raw).await?;
    Ok(Json(ApiResponse::timed(updated, start)))
}
