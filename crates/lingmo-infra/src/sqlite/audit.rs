//! SQLite audit history: switch events, request logs and notifications.
//!
//! Rows are listed newest first by insertion order (`rowid`); the single
//! writer connection makes insertion order match emission order.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use lingmo_core::repository::audit::{AuditRepository, history_limit};
use lingmo_types::audit::{
    LogKind, LogQuery, Notification, NotificationLevel, RequestLog, SwitchEvent, SwitchReason,
};
use lingmo_types::error::RepositoryError;
use lingmo_types::model::ModelId;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_error};

#[derive(Debug, Clone)]
pub struct SqliteAuditRepository {
    pool: DatabasePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl AuditRepository for SqliteAuditRepository {
    async fn record_switch(&self, event: &SwitchEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO switch_events (id, from_model_id, to_model_id, reason, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.from_model_id.map(|id| id.0))
        .bind(event.to_model_id.map(|id| id.0))
        .bind(event.reason.to_string())
        .bind(format_datetime(&event.timestamp))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn record_request(&self, log: &RequestLog) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO request_logs (id, kind, model_id, requested_model, prompt_tokens, completion_tokens, latency_ms, detail, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(log.id.to_string())
        .bind(log.kind.to_string())
        .bind(log.model_id.map(|id| id.0))
        .bind(&log.requested_model)
        .bind(log.prompt_tokens as i64)
        .bind(log.completion_tokens as i64)
        .bind(log.latency_ms as i64)
        .bind(&log.detail)
        .bind(format_datetime(&log.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn record_notification(&self, notification: &Notification) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO notifications (id, title, content, level, model_id, is_read, created_at, read_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(notification.id.to_string())
        .bind(&notification.title)
        .bind(&notification.content)
        .bind(notification.level.to_string())
        .bind(notification.model_id.map(|id| id.0))
        .bind(notification.is_read)
        .bind(format_datetime(&notification.created_at))
        .bind(notification.read_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn list_switch_events(&self, limit: u32) -> Result<Vec<SwitchEvent>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM switch_events ORDER BY rowid DESC LIMIT ?")
            .bind(i64::from(history_limit(Some(limit))))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(query_error)?;
                let from: Option<i64> = row.try_get("from_model_id").map_err(query_error)?;
                let to: Option<i64> = row.try_get("to_model_id").map_err(query_error)?;
                let reason: String = row.try_get("reason").map_err(query_error)?;
                let timestamp: String = row.try_get("timestamp").map_err(query_error)?;

                Ok(SwitchEvent {
                    id: parse_uuid(&id)?,
                    from_model_id: from.map(ModelId),
                    to_model_id: to.map(ModelId),
                    reason: reason
                        .parse::<SwitchReason>()
                        .map_err(RepositoryError::Query)?,
                    timestamp: parse_datetime(&timestamp)?,
                })
            })
            .collect()
    }

    async fn list_request_logs(&self, query: &LogQuery) -> Result<Vec<RequestLog>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM request_logs
               WHERE (?1 IS NULL OR kind = ?1) AND (?2 IS NULL OR model_id = ?2)
               ORDER BY rowid DESC LIMIT ?3"#,
        )
        .bind(query.kind.map(|k| k.to_string()))
        .bind(query.model_id.map(|id| id.0))
        .bind(i64::from(history_limit(query.limit)))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(query_error)?;
                let kind: String = row.try_get("kind").map_err(query_error)?;
                let model_id: Option<i64> = row.try_get("model_id").map_err(query_error)?;
                let prompt: i64 = row.try_get("prompt_tokens").map_err(query_error)?;
                let completion: i64 = row.try_get("completion_tokens").map_err(query_error)?;
                let latency: i64 = row.try_get("latency_ms").map_err(query_error)?;
                let created_at: String = row.try_get("created_at").map_err(query_error)?;

                Ok(RequestLog {
                    id: parse_uuid(&id)?,
                    kind: kind.parse::<LogKind>().map_err(RepositoryError::Query)?,
                    model_id: model_id.map(ModelId),
                    requested_model: row.try_get("requested_model").map_err(query_error)?,
                    prompt_tokens: prompt.max(0) as u64,
                    completion_tokens: completion.max(0) as u64,
                    latency_ms: latency.max(0) as u64,
                    detail: row.try_get("detail").map_err(query_error)?,
                    created_at: parse_datetime(&created_at)?,
                })
            })
            .collect()
    }

    async fn list_notifications(
        &self,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE (?1 = 0 OR is_read = 0) ORDER BY rowid DESC LIMIT ?2",
        )
        .bind(unread_only)
        .bind(i64::from(history_limit(Some(limit))))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(query_error)?;
                let level: String = row.try_get("level").map_err(query_error)?;
                let model_id: Option<i64> = row.try_get("model_id").map_err(query_error)?;
                let created_at: String = row.try_get("created_at").map_err(query_error)?;
                let read_at: Option<String> = row.try_get("read_at").map_err(query_error)?;

                Ok(Notification {
                    id: parse_uuid(&id)?,
                    title: row.try_get("title").map_err(query_error)?,
                    content: row.try_get("content").map_err(query_error)?,
                    level: level
                        .parse::<NotificationLevel>()
                        .map_err(RepositoryError::Query)?,
                    model_id: model_id.map(ModelId),
                    is_read: row.try_get("is_read").map_err(query_error)?,
                    created_at: parse_datetime(&created_at)?,
                    read_at: read_at.as_deref().map(parse_datetime).transpose()?,
                })
            })
            .collect()
    }

    async fn mark_notification_read(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = COALESCE(read_at, ?) WHERE id = ?",
        )
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn unread_notification_count(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE is_read = 0")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_error)?;
        Ok(count.max(0) as u64)
    }

    async fn mark_all_notifications_read(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1, read_at = ? WHERE is_read = 0")
            .bind(format_datetime(&Utc::now()))
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_notification(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_read_notifications(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM notifications WHERE is_read = 1")
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    async fn clear_request_logs(&self, kind: Option<LogKind>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM request_logs WHERE (?1 IS NULL OR kind = ?1)")
            .bind(kind.map(|k| k.to_string()))
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        let scope = kind.map_or_else(|| "all".to_string(), |k| k.to_string());
        tracing::info!(kind = %scope, deleted = result.rows_affected(), "Request logs cleared");
        Ok(result.rows_affected())
    }

    async fn clear_switch_events(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM switch_events")
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}
