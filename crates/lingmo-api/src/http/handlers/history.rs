//! Audit history: switch events, request logs and notifications.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use uuid::Uuid;

use lingmo_core::repository::audit::{AuditRepository, history_limit};
use lingmo_types::audit::{Notification, RequestLog, SwitchEvent};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::query::{ClearLogsQuery, LimitQuery, LogsQuery, NotificationQuery};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/switch-events?limit=
pub async fn list_switch_events(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<SwitchEvent>>>, AppError> {
    let start = Instant::now();
    let events = state
        .audit_repo
        .list_switch_events(history_limit(query.limit))
        .await?;
    Ok(Json(ApiResponse::timed(events, start)))
}

/// GET /api/logs?kind=&model_id=&limit=
pub async fn list_logs(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<LogsQuery>,
) -> Result<Json<ApiResponse<Vec<RequestLog>>>, AppError> {
    let start = Instant::now();
    let query = query.into_log_query()?;
    let logs = state.audit_repo.list_request_logs(&query).await?;
    Ok(Json(ApiResponse::timed(logs, start)))
}

/// GET /api/notifications?unread=
pub async fn list_notifications(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<ApiResponse<Vec<Notification>>>, AppError> {
    let start = Instant::now();
    let notifications = state
        .audit_repo
        .list_notifications(query.unread, history_limit(query.limit))
        .await?;
    Ok(Json(ApiResponse::timed(notifications, start)))
}

/// POST /api/notifications/{id}/read
pub async fn mark_notification_read(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    if !state.audit_repo.mark_notification_read(&id).await? {
        return Err(AppError::NotFound(format!("Notification {id} not found")));
    }
    Ok(Json(ApiResponse::timed(
        serde_json::json!({ "id": id, "is_read": true }),
        start,
    )))
}

/// POST /api/notifications/read-all
pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let updated = state.audit_repo.mark_all_notifications_read().await?;
    Ok(Json(ApiResponse::timed(
        serde_json::json!({ "updated": updated }),
        start,
    )))
}

/// GET /api/notifications/unread-count
pub async fn unread_notification_count(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let count = state.audit_repo.unread_notification_count().await?;
    Ok(Json(ApiResponse::timed(
        serde_json::json!({ "count": count }),
        start,
    )))
}

/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    if !state.audit_repo.delete_notification(&id).await? {
        return Err(AppError::NotFound(format!("Notification {id} not found")));
    }
    Ok(Json(ApiResponse::timed(
        serde_json::json!({ "id": id, "deleted": true }),
        start,
    )))
}

/// POST /api/notifications/clear-read
pub async fn clear_read_notifications(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let deleted = state.audit_repo.clear_read_notifications().await?;
    Ok(Json(ApiResponse::timed(
        serde_json::json!({ "deleted": deleted }),
        start,
    )))
}

/// POST /api/logs/clear?kind=
pub async fn clear_logs(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<ClearLogsQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let kind = query.kind()?;
    let deleted = state.audit_repo.clear_request_logs(kind).await?;
    Ok(Json(ApiResponse::timed(
        serde_json::json!({ "deleted": deleted }),
        start,
    )))
}

/// POST /api/switch-events/clear
pub async fn clear_switch_events(
    State(state): State<AppState>,
    _auth: Authenticated,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let deleted = state.audit_repo.clear_switch_events().await?;
    Ok(Json(ApiResponse::timed(
        serde_json::json!({ "deleted": deleted }),
        start,
    )))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use lingmo_core::repository::audit::AuditRepository;
    use lingmo_types::audit::{LogKind, Notification, RequestLog};
    use lingmo_types::model::ModelId;

    use crate::http::test_support::TestApp;

    #[tokio::test]
    async fn test_unknown_log_kind_is_rejected() {
        let app = TestApp::new().await;
        let (status, _) = app.call("GET", "/api/logs?kind=debug", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mark_unknown_notification_is_404() {
        let app = TestApp::new().await;
        let id = uuid::Uuid::now_v7();
        let (status, _) = app
            .call("POST", &format!("/api/notifications/{id}/read"), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_history() {
        let app = TestApp::new().await;
        let (status, body) = app.call("GET", "/api/switch-events?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_clear_logs_by_kind() {
        let app = TestApp::new().await;
        let repo = &app.state.audit_repo;
        for kind in [LogKind::Access, LogKind::Error] {
            repo.record_request(&RequestLog::new(kind, Some(ModelId(1)), "gpt-4o"))
                .await
                .unwrap();
        }

        let (status, _) = app.call("POST", "/api/logs/clear?kind=verbose", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app.call("POST", "/api/logs/clear?kind=error", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["deleted"], 1);

        let (_, body) = app.call("GET", "/api/logs", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["kind"], "access");

        let (_, body) = app.call("POST", "/api/logs/clear", None).await;
        assert_eq!(body["data"]["deleted"], 1);
    }

    #[tokio::test]
    async fn test_notification_bulk_routes() {
        let app = TestApp::new().await;
        let repo = &app.state.audit_repo;
        let kept = Notification::none_available(None);
        let removed = Notification::none_available(Some(ModelId(3)));
        for note in [&kept, &removed] {
            repo.record_notification(note).await.unwrap();
        }

        let (_, body) = app.call("GET", "/api/notifications/unread-count", None).await;
        assert_eq!(body["data"]["count"], 2);

        let (status, _) = app
            .call("DELETE", &format!("/api/notifications/{}", removed.id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .call("DELETE", &format!("/api/notifications/{}", removed.id), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = app.call("POST", "/api/notifications/read-all", None).await;
        assert_eq!(body["data"]["updated"], 1);
        let (_, body) = app.call("GET", "/api/notifications/unread-count", None).await;
        assert_eq!(body["data"]["count"], 0);

        let (_, body) = app.call("POST", "/api/notifications/clear-read", None).await;
        assert_eq!(body["data"]["deleted"], 1);
        let (_, body) = app.call("GET", "/api/notifications", None).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }
}
