//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod audit;
pub mod config;
pub mod model;
pub mod pool;
pub mod quota;

use chrono::{DateTime, Utc};
use lingmo_types::error::RepositoryError;

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}
