//! Audit history repository trait definition.
//!
//! Switch events and request logs are only ever appended or cleared in bulk.
//! Notifications also carry a read flag and can be deleted one by one.

use lingmo_types::audit::{LogKind, LogQuery, Notification, RequestLog, SwitchEvent};
use lingmo_types::error::RepositoryError;
use uuid::Uuid;

/// Default page size for history listings.
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// Hard cap on history listings.
pub const MAX_HISTORY_LIMIT: u32 = 1000;

/// Clamp a caller-supplied limit into `1..=MAX_HISTORY_LIMIT`.
pub fn history_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

pub trait AuditRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Append
    // -----------------------------------------------------------------------

    fn record_switch(
        &self,
        event: &SwitchEvent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn record_request(
        &self,
        log: &RequestLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn record_notification(
        &self,
        notification: &Notification,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Query
    // -----------------------------------------------------------------------

    /// Most recent switch events first.
    fn list_switch_events(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<SwitchEvent>, RepositoryError>> + Send;

    /// Most recent request logs first, filtered by kind and model.
    fn list_request_logs(
        &self,
        query: &LogQuery,
    ) -> impl std::future::Future<Output = Result<Vec<RequestLog>, RepositoryError>> + Send;

    /// Most recent notifications first.
    fn list_notifications(
        &self,
        unread_only: bool,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Notification>, RepositoryError>> + Send;

    fn unread_notification_count(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Mark a notification read. Returns `false` if it does not exist.
    fn mark_notification_read(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Returns how many notifications changed from unread to read.
    fn mark_all_notifications_read(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Returns `false` if the notification does not exist.
    fn delete_notification(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete every read notification, returning how many were removed.
    fn clear_read_notifications(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Delete request logs, all of them or only those of `kind`.
    fn clear_request_logs(
        &self,
        kind: Option<LogKind>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    fn clear_switch_events(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
