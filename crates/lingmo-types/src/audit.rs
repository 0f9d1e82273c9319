//! Audit records: switch events, request logs and notifications.
//!
//! All three are append-only from the gateway's point of view. The admin
//! console reads them back through the management API and may only flip a
//! notification's read flag.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::ModelId;

/// Maximum length of a vendor error detail kept in logs.
pub const MAX_DETAIL_LEN: usize = 256;

/// Truncate a detail string to [`MAX_DETAIL_LEN`] characters.
pub fn truncate_detail(detail: &str) -> String {
    if detail.chars().count() <= MAX_DETAIL_LEN {
        return detail.to_string();
    }
    let mut out: String = detail.chars().take(MAX_DETAIL_LEN).collect();
    out.push('…');
    out
}

/// Why the active model changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    QuotaExhausted,
    Unreachable,
    Manual,
    NoneAvailable,
}

impl fmt::Display for SwitchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchReason::QuotaExhausted => write!(f, "quota_exhausted"),
            SwitchReason::Unreachable => write!(f, "unreachable"),
            SwitchReason::Manual => write!(f, "manual"),
            SwitchReason::NoneAvailable => write!(f, "none_available"),
        }
    }
}

impl FromStr for SwitchReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quota_exhausted" => Ok(SwitchReason::QuotaExhausted),
            "unreachable" => Ok(SwitchReason::Unreachable),
            "manual" => Ok(SwitchReason::Manual),
            "none_available" => Ok(SwitchReason::NoneAvailable),
            other => Err(format!("invalid switch reason: '{other}'")),
        }
    }
}

/// Immutable record of an active-model change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchEvent {
    pub id: Uuid,
    pub from_model_id: Option<ModelId>,
    /// `None` when no model was available.
    pub to_model_id: Option<ModelId>,
    pub reason: SwitchReason,
    pub timestamp: DateTime<Utc>,
}

impl SwitchEvent {
    pub fn new(from: Option<ModelId>, to: Option<ModelId>, reason: SwitchReason) -> Self {
        Self {
            id: Uuid::now_v7(),
            from_model_id: from,
            to_model_id: to,
            reason,
            timestamp: Utc::now(),
        }
    }
}

/// Kind of a request log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// A forwarding attempt that succeeded.
    Access,
    /// A forwarding attempt that failed.
    Error,
    /// A manual connectivity test.
    Test,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Access => write!(f, "access"),
            LogKind::Error => write!(f, "error"),
            LogKind::Test => write!(f, "test"),
        }
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(LogKind::Access),
            "error" => Ok(LogKind::Error),
            "test" => Ok(LogKind::Test),
            other => Err(format!("invalid log kind: '{other}'")),
        }
    }
}

/// One forwarding attempt (or connectivity test).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: Uuid,
    pub kind: LogKind,
    pub model_id: Option<ModelId>,
    /// The model name the caller asked for.
    pub requested_model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: u64,
    /// Truncated error detail for failures, empty otherwise.
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl RequestLog {
    pub fn new(kind: LogKind, model_id: Option<ModelId>, requested_model: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            model_id,
            requested_model: requested_model.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
            latency_ms: 0,
            detail: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_tokens(mut self, prompt: u64, completion: u64) -> Self {
        self.prompt_tokens = prompt;
        self.completion_tokens = completion;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = truncate_detail(detail);
        self
    }
}

/// Filter for reading request logs back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQuery {
    pub kind: Option<LogKind>,
    pub model_id: Option<ModelId>,
    pub limit: Option<u32>,
}

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationLevel::Info => write!(f, "info"),
            NotificationLevel::Warning => write!(f, "warning"),
            NotificationLevel::Error => write!(f, "error"),
        }
    }
}

impl FromStr for NotificationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(NotificationLevel::Info),
            "warning" => Ok(NotificationLevel::Warning),
            "error" => Ok(NotificationLevel::Error),
            other => Err(format!("invalid notification level: '{other}'")),
        }
    }
}

/// An operator-facing notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub level: NotificationLevel,
    pub model_id: Option<ModelId>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(
        level: NotificationLevel,
        model_id: Option<ModelId>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            title: title.into(),
            content: content.into(),
            level,
            model_id,
            is_read: false,
            created_at: Utc::now(),
            read_at: None,
        }
    }

    /// Usage crossed the alert threshold.
    pub fn quota_alert(model_id: ModelId, model_name: &str, ratio: f64, threshold: f64) -> Self {
        Self::new(
            NotificationLevel::Warning,
            Some(model_id),
            "Quota alert",
            format!(
                "{model_name} has used {:.1}% of its quota (alert threshold {:.1}%)",
                ratio * 100.0,
                threshold * 100.0
            ),
        )
    }

    /// The active model changed.
    pub fn failover(event: &SwitchEvent) -> Self {
        let from = event
            .from_model_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());
        let to = event
            .to_model_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());
        Self::new(
            NotificationLevel::Info,
            event.to_model_id,
            "Model switched",
            format!("Active model changed from {from} to {to} ({})", event.reason),
        )
    }

    /// No model could serve traffic.
    pub fn none_available(from: Option<ModelId>) -> Self {
        Self::new(
            NotificationLevel::Error,
            from,
            "No model available",
            "Every enabled model is exhausted, unreachable or unconfigured",
        )
    }
}
