//! Axum router configuration with middleware.
//!
//! `/v1/chat/completions` is the OpenAI-compatible surface. Management routes
//! live under `/api/`. Both require the gateway API key; `/health` does not.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{delete, get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Model endpoints
        .route(
            "/models",
            get(handlers::models::list_models).post(handlers::models::create_model),
        )
        .route(
            "/models/{id}",
            get(handlers::models::get_model)
                .put(handlers::models::update_model)
                .delete(handlers::models::delete_model),
        )
        .route("/models/{id}/enable", post(handlers::models::enable_model))
        .route("/models/{id}/disable", post(handlers::models::disable_model))
        .route("/models/{id}/test", post(handlers::models::test_model))
        // Quota
        .route("/quota", get(handlers::quota::list_quota))
        .route("/quota/{id}", put(handlers::quota::set_quota))
        .route("/quota/{id}/sync", post(handlers::quota::sync_quota))
        // Router
        .route("/router", get(handlers::routing::get_status))
        .route("/router/switch", post(handlers::routing::switch_model))
        // History
        .route("/switch-events", get(handlers::history::list_switch_events))
        .route(
            "/switch-events/clear",
            post(handlers::history::clear_switch_events),
        )
        .route("/logs", get(handlers::history::list_logs))
        .route("/logs/clear", post(handlers::history::clear_logs))
        .route("/notifications", get(handlers::history::list_notifications))
        .route(
            "/notifications/unread-count",
            get(handlers::history::unread_notification_count),
        )
        .route(
            "/notifications/read-all",
            post(handlers::history::mark_all_notifications_read),
        )
        .route(
            "/notifications/clear-read",
            post(handlers::history::clear_read_notifications),
        )
        .route(
            "/notifications/{id}",
            delete(handlers::history::delete_notification),
        )
        .route(
            "/notifications/{id}/read",
            post(handlers::history::mark_notification_read),
        )
        // Runtime settings
        .route("/config", get(handlers::config::get_config))
        .route("/config/{key}", put(handlers::config::update_config));

    Router::new()
        .route("/v1/chat/completions", post(handlers::chat::chat_completions))
        .nest("/api", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness and the enabled endpoint count (no auth required).
///
/// Routing state stays behind the gateway key at `/api/router`.
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "enabled_models": state.registry.enabled_count(),
    }))
}
