//! Envelope response format for management API responses.
//!
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 }
//! }
//! ```
//!
//! Failures carry `"data": null` and an `errors` list instead; see
//! [`AppError`](crate::http::error::AppError).

use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub meta: ApiMeta,
}

#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: String,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
    pub response_time_ms: u64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, request_id: String, response_time_ms: u64) -> Self {
        Self {
            data: Some(data),
            meta: ApiMeta {
                request_id,
                timestamp: chrono::Utc::now().to_rfc3339(),
                response_time_ms,
            },
        }
    }

    /// Success envelope timed from `start`, with a fresh request id.
    pub fn timed(data: T, start: Instant) -> Self {
        Self::success(
            data,
            uuid::Uuid::now_v7().to_string(),
            start.elapsed().as_millis() as u64,
        )
    }
}
