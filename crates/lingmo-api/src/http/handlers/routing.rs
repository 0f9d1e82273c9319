//! Router inspection and manual switching.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use lingmo_types::audit::SwitchEvent;
use lingmo_types::model::ModelId;
use lingmo_types::status::RouterStatus;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    pub model_id: ModelId,
}

/// GET /api/router - Active model, version and per-model circuit status.
pub async fn get_status(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<ApiResponse<RouterStatus>>, AppError> {
    let start = Instant::now();
    Ok(Json(ApiResponse::timed(state.router.status(), start)))
}

/// POST /api/router/switch
pub async fn switch_model(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(body): Json<SwitchRequest>,
) -> Result<Json<ApiResponse<SwitchEvent>>, AppError> {
    let start = Instant::now();
    let event = state.router.manual_switch(body.model_id)?;
    Ok(Json(ApiResponse::timed(event, start)))
}
