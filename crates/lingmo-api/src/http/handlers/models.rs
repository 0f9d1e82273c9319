//! Model endpoint management handlers.
//!
//! Every mutation goes through `ModelService`, which reloads the registry
//! snapshot the router reads. Credentials are never returned; responses
//! carry `has_credential` instead.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};

use lingmo_core::service::ConnectivityOutcome;
use lingmo_types::model::{CreateModelRequest, ModelEndpointView, ModelId, UpdateModelRequest};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/models
pub async fn list_models(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<ApiResponse<Vec<ModelEndpointView>>>, AppError> {
    let start = Instant::now();
    let models = state.models.list().await?;
    let views = models.iter().map(|m| m.view()).collect();
    Ok(Json(ApiResponse::timed(views, start)))
}

/// POST /api/models
pub async fn create_model(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(body): Json<CreateModelRequest>,
) -> Result<Json<ApiResponse<ModelEndpointView>>, AppError> {
    let start = Instant::now();
    let model = state.models.create(body).await?;
    Ok(Json(ApiResponse::timed(model.view(), start)))
}

/// GET /api/models/{id}
pub async fn get_model(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<ModelId>,
) -> Result<Json<ApiResponse<ModelEndpointView>>, AppError> {
    let start = Instant::now();
    let model = state.models.get(id).await?;
    Ok(Json(ApiResponse::timed(model.view(), start)))
}

/// PUT /api/models/{id}
pub async fn update_model(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<ModelId>,
    Json(body): Json<UpdateModelRequest>,
) -> Result<Json<ApiResponse<ModelEndpointView>>, AppError> {
    let start = Instant::now();
    let model = state.models.update(id, body).await?;
    Ok(Json(ApiResponse::timed(model.view(), start)))
}

/// DELETE /api/models/{id}
pub async fn delete_model(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<ModelId>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    state.models.delete(id).await?;
    Ok(Json(ApiResponse::timed(
        serde_json::json!({ "deleted": id }),
        start,
    )))
}

/// POST /api/models/{id}/enable
pub async fn enable_model(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<ModelId>,
) -> Result<Json<ApiResponse<ModelEndpointView>>, AppError> {
    set_enabled(state, auth, id, true).await
}

/// POST /api/models/{id}/disable
pub async fn disable_model(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(id): Path<ModelId>,
) -> Result<Json<ApiResponse<ModelEndpointView>>, AppError> {
    set_enabled(state, auth, id, false).await
}

async fn set_enabled(
    state: AppState,
    _auth: Authenticated,
    id: ModelId,
    enabled: bool,
) -> Result<Json<ApiResponse<ModelEndpointView>>, AppError> {
    let start = Instant::now();
    let model = state.models.set_enabled(id, enabled).await?;
    Ok(Json(ApiResponse::timed(model.view(), start)))
}

/// POST /api/models/{id}/test - Manual connectivity probe.
///
/// Forces a half-open probe regardless of circuit cooldown. An unreachable
/// model is still a successful API call; the outcome says `disconnected`.
pub async fn test_model(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<ModelId>,
) -> Result<Json<ApiResponse<ConnectivityOutcome>>, AppError> {
    let start = Instant::now();
    let outcome = state
        .models
        .test_connectivity(
            id,
            state.gateway.forwarder(),
            state.config.connect_test_timeout(),
        )
        .await?;
    Ok(Json(ApiResponse::timed(outcome, start)))
}
