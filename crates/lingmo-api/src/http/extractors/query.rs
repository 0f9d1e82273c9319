//! Query parameter extractors for history endpoints.

use serde::Deserialize;

use lingmo_types::audit::{LogKind, LogQuery};
use lingmo_types::model::ModelId;

use crate::http::error::AppError;

#[derive(Debug, Deserialize, Default)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

/// `GET /api/logs?kind=&model_id=&limit=`
#[derive(Debug, Deserialize, Default)]
pub struct LogsQuery {
    /// access, error or test.
    pub kind: Option<String>,
    pub model_id: Option<i64>,
    pub limit: Option<u32>,
}

impl LogsQuery {
    pub fn into_log_query(self) -> Result<LogQuery, AppError> {
        Ok(LogQuery {
            kind: parse_kind(self.kind.as_deref())?,
            model_id: self.model_id.map(ModelId),
            limit: self.limit,
        })
    }
}

/// `POST /api/logs/clear?kind=`
#[derive(Debug, Deserialize, Default)]
pub struct ClearLogsQuery {
    /// Clears every kind when absent.
    pub kind: Option<String>,
}

impl ClearLogsQuery {
    pub fn kind(&self) -> Result<Option<LogKind>, AppError> {
        parse_kind(self.kind.as_deref())
    }
}

fn parse_kind(raw: Option<&str>) -> Result<Option<LogKind>, AppError> {
    match raw.filter(|k| !k.is_empty()) {
        Some(k) => k.parse::<LogKind>().map(Some).map_err(AppError::Validation),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct NotificationQuery {
    /// Only unread notifications when true.
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<u32>,
}
