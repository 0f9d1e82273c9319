//! Gateway API key authentication extractors.
//!
//! Keys are read from `Authorization: Bearer <key>` or `X-API-Key: <key>` and
//! compared against the current `gateway_api_key` setting. While no key is
//! configured every request is rejected.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use lingmo_infra::crypto::secrets_match;

use crate::http::error::{AppError, ChatError};
use crate::state::AppState;

/// Marker for management routes. Extracting this validates the API key.
pub struct Authenticated;

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        verify(parts, state).map_err(AppError::Unauthorized)?;
        Ok(Authenticated)
    }
}

/// Marker for the OpenAI-compatible routes. Rejects with `{"detail": ...}`.
pub struct GatewayAuthenticated;

impl FromRequestParts<AppState> for GatewayAuthenticated {
    type Rejection = ChatError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        verify(parts, state).map_err(ChatError::Unauthorized)?;
        Ok(GatewayAuthenticated)
    }
}

fn verify(parts: &Parts, state: &AppState) -> Result<(), String> {
    let presented = extract_api_key(parts)?;
    let settings = state.settings.current();
    if settings.gateway_api_key.is_blank() {
        return Err("Gateway API key is not configured".to_string());
    }
    if secrets_match(&presented, settings.gateway_api_key.expose()) {
        Ok(())
    } else {
        tracing::debug!("Rejected request with invalid API key");
        Err("Invalid API key".to_string())
    }
}

fn extract_api_key(parts: &Parts) -> Result<String, String> {
    if let Some(auth) = parts.headers.get("authorization") {
        let auth_str = auth
            .to_str()
            .map_err(|_| "Invalid Authorization header encoding".to_string())?;
        if let Some(key) = auth_str.strip_prefix("Bearer ") {
            return Ok(key.trim().to_string());
        }
    }

    if let Some(key) = parts.headers.get("x-api-key") {
        let key_str = key
            .to_str()
            .map_err(|_| "Invalid X-API-Key header encoding".to_string())?;
        return Ok(key_str.trim().to_string());
    }

    Err("Missing API key. Provide via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header.".to_string())
}
