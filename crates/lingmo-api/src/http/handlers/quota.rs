//! Quota figures per model.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use lingmo_types::model::ModelId;
use lingmo_types::quota::{QuotaSnapshot, QuotaView};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetQuotaRequest {
    pub total_tokens: u64,
    pub used_tokens: u64,
}

fn view(state: &AppState, snapshot: QuotaSnapshot) -> QuotaView {
    QuotaView {
        model_id: snapshot.model_id,
        total_tokens: snapshot.total_tokens,
        used_tokens: snapshot.used_tokens,
        remaining_tokens: snapshot.remaining(),
        usage_ratio: snapshot.usage_ratio(),
        sync_type: snapshot.sync_type,
        last_sync_time: snapshot.last_sync_time,
        eligible: state.quota.is_eligible(snapshot.model_id),
    }
}

/// GET /api/quota - One entry per configured model, in priority order.
pub async fn list_quota(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<ApiResponse<Vec<QuotaView>>>, AppError> {
    let start = Instant::now();
    let views = state
        .registry
        .list_all()
        .iter()
        .map(|endpoint| view(&state, state.quota.snapshot(endpoint.id)))
        .collect();
    Ok(Json(ApiResponse::timed(views, start)))
}

/// PUT /api/quota/{id} - Operator-entered figures, stored as reported.
pub async fn set_quota(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<ModelId>,
    Json(body): Json<SetQuotaRequest>,
) -> Result<Json<ApiResponse<QuotaView>>, AppError> {
    let start = Instant::now();
    let snapshot = state
        .synchronizer
        .apply_manual(id, body.total_tokens, body.used_tokens)
        .await?;
    Ok(Json(ApiResponse::timed(view(&state, snapshot), start)))
}

/// POST /api/quota/{id}/sync - Fetch vendor-reported usage now.
pub async fn sync_quota(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<ModelId>,
) -> Result<Json<ApiResponse<QuotaView>>, AppError> {
    let start = Instant::now();
    let snapshot = state.synchronizer.sync_model(id).await?;
    Ok(Json(ApiResponse::timed(view(&state, snapshot), start)))
}
