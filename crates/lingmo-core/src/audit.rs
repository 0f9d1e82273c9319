//! Audit emitter.
//!
//! Request paths hand switch events, request logs and notifications to a
//! bounded channel and move on. A writer task in lingmo-infra drains it into
//! SQLite. Emitting never blocks; when the channel is full the event is
//! dropped with a warning.

use tokio::sync::mpsc;

use lingmo_types::audit::{Notification, RequestLog, SwitchEvent};
use lingmo_types::model::ModelEndpoint;
use lingmo_types::quota::AlertTransition;

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    Switch(SwitchEvent),
    Request(RequestLog),
    Notify(Notification),
}

/// Producer side of the audit channel.
pub struct AuditEmitter {
    sender: mpsc::Sender<AuditEvent>,
}

impl AuditEmitter {
    /// Create an emitter and the receiver the writer task consumes.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: AuditEvent) {
        if let Err(err) = self.sender.try_send(event) {
            match err {
                mpsc::error::TrySendError::Full(event) => {
                    tracing::warn!(?event, "Audit channel full, dropping event");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::debug!("Audit channel closed, dropping event");
                }
            }
        }
    }

    pub fn switch(&self, event: SwitchEvent) {
        self.emit(AuditEvent::Switch(event));
    }

    pub fn request(&self, log: RequestLog) {
        self.emit(AuditEvent::Request(log));
    }

    pub fn notify(&self, notification: Notification) {
        self.emit(AuditEvent::Notify(notification));
    }

    /// Emit a quota alert if `transition` is an upward crossing.
    pub fn quota_alert(
        &self,
        transition: AlertTransition,
        endpoint: &ModelEndpoint,
        ratio: f64,
        threshold: f64,
    ) {
        match transition {
            AlertTransition::Raised => {
                tracing::info!(
                    model_id = %endpoint.id,
                    ratio,
                    threshold,
                    "Quota alert threshold crossed"
                );
                self.notify(Notification::quota_alert(
                    endpoint.id,
                    &endpoint.model_name,
                    ratio,
                    threshold,
                ));
            }
            AlertTransition::Cleared => {
                tracing::debug!(model_id = %endpoint.id, ratio, "Quota alert re-armed");
            }
            AlertTransition::None => {}
        }
    }
}

impl Clone for AuditEmitter {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEmitter")
            .field("capacity", &self.sender.capacity())
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingmo_types::audit::{LogKind, SwitchReason};
    use lingmo_types::model::ModelId;

    #[tokio::test]
    async fn emitted_events_arrive_in_order() {
        let (emitter, mut rx) = AuditEmitter::channel(8);
        emitter.switch(SwitchEvent::new(None, Some(ModelId(1)), SwitchReason::Manual));
        emitter.request(RequestLog::new(LogKind::Access, Some(ModelId(1)), "gpt-4o"));

        assert!(matches!(rx.recv().await, Some(AuditEvent::Switch(_))));
        assert!(matches!(rx.recv().await, Some(AuditEvent::Request(_))));
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (emitter, mut rx) = AuditEmitter::channel(1);
        emitter.request(RequestLog::new(LogKind::Access, None, "a"));
        emitter.request(RequestLog::new(LogKind::Access, None, "b"));

        let AuditEvent::Request(first) = rx.try_recv().unwrap() else {
            panic!("expected request log");
        };
        assert_eq!(first.requested_model, "a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_after_receiver_dropped_is_noop() {
        let (emitter, rx) = AuditEmitter::channel(4);
        drop(rx);
        emitter.notify(Notification::none_available(None));
    }

    #[test]
    fn quota_alert_only_on_raise() {
        let (emitter, mut rx) = AuditEmitter::channel(4);
        let ep = crate::testing::endpoint(1, 1, lingmo_types::model::ApiSpec::OpenAi);
        emitter.quota_alert(AlertTransition::None, &ep, 0.5, 0.8);
        emitter.quota_alert(AlertTransition::Cleared, &ep, 0.5, 0.8);
        assert!(rx.try_recv().is_err());
        emitter.quota_alert(AlertTransition::Raised, &ep, 0.85, 0.8);
        assert!(matches!(rx.try_recv(), Ok(AuditEvent::Notify(_))));
    }

    #[test]
    fn debug_impl() {
        let (emitter, _rx) = AuditEmitter::channel(4);
        let debug = format!("{emitter:?}");
        assert!(debug.contains("AuditEmitter"));
    }
}
