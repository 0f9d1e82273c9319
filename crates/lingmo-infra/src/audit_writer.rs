//! Background task that drains the audit channel into an [`AuditRepository`].

use tokio::sync::mpsc;

use lingmo_core::audit::AuditEvent;
use lingmo_core::repository::audit::AuditRepository;

/// Persist audit events until every emitter is dropped.
///
/// Write failures are logged and the event is discarded; the request path
/// never waits on persistence. Returns the number of events written.
pub async fn run_audit_writer<R: AuditRepository + 'static>(
    repo: R,
    mut events: mpsc::Receiver<AuditEvent>,
) -> u64 {
    let mut written = 0u64;
    while let Some(event) = events.recv().await {
        let result = match &event {
            AuditEvent::Switch(e) => repo.record_switch(e).await,
            AuditEvent::Request(l) => repo.record_request(l).await,
            AuditEvent::Notify(n) => repo.record_notification(n).await,
        };
        match result {
            Ok(()) => written += 1,
            Err(err) => tracing::error!(error = %err, ?event, "Failed to persist audit event"),
        }
    }
    tracing::debug!(written, "Audit writer stopped");
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::audit::SqliteAuditRepository;
    use crate::sqlite::pool::test_pool;
    use lingmo_core::audit::AuditEmitter;
    use lingmo_types::audit::{LogKind, LogQuery, Notification, RequestLog, SwitchEvent, SwitchReason};
    use lingmo_types::model::ModelId;

    #[tokio::test]
    async fn drains_until_emitters_drop() {
        let repo = SqliteAuditRepository::new(test_pool().await);
        let (emitter, rx) = AuditEmitter::channel(16);
        let writer = tokio::spawn(run_audit_writer(repo.clone(), rx));

        emitter.switch(SwitchEvent::new(Some(ModelId(1)), Some(ModelId(2)), SwitchReason::Unreachable));
        emitter.request(RequestLog::new(LogKind::Access, Some(ModelId(2)), "gpt-4o"));
        emitter.notify(Notification::none_available(None));
        drop(emitter);

        assert_eq!(writer.await.unwrap(), 3);
        assert_eq!(repo.list_switch_events(10).await.unwrap().len(), 1);
        assert_eq!(repo.list_request_logs(&LogQuery::default()).await.unwrap().len(), 1);
        assert_eq!(repo.list_notifications(false, 10).await.unwrap().len(), 1);
    }
}
