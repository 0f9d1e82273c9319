//! OpenAI-compatible chat completion endpoint.
//!
//! POST /v1/chat/completions answers with a `chat.completion` object, or with
//! an SSE stream of `chat.completion.chunk` events when `stream` is true. The
//! stream always ends with a single `data: [DONE]`.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;

use lingmo_core::gateway::StreamFrame;
use lingmo_types::chat::ChatCompletionRequest;

use crate::http::error::ChatError;
use crate::http::extractors::auth::GatewayAuthenticated;
use crate::state::AppState;

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    _auth: GatewayAuthenticated,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ChatError> {
    if request.messages.is_empty() {
        return Err(ChatError::BadRequest("messages cannot be empty".to_string()));
    }

    if !request.stream.unwrap_or(false) {
        let response = state.gateway.complete(&request).await?;
        return Ok(Json(response).into_response());
    }

    let stream = state.gateway.open_stream(&request).await?;
    tracing::debug!(model_id = %stream.model_id(), "Streaming completion");
    let events = stream
        .into_frames()
        .map(|frame| Ok::<_, Infallible>(frame_event(frame)));

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response())
}

fn frame_event(frame: StreamFrame) -> Event {
    match frame {
        StreamFrame::Chunk(chunk) => match serde_json::to_string(&chunk) {
            Ok(data) => Event::default().data(data),
            Err(err) => error_event(&format!("failed to encode chunk: {err}")),
        },
        StreamFrame::Error(detail) => error_event(&detail),
        StreamFrame::Done => Event::default().data("[DONE]"),
    }
}

fn error_event(detail: &str) -> Event {
    let body = serde_json::json!({
        "error": {
            "message": detail,
            "type": "upstream_error",
        }
    });
    Event::default().data(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::http::test_support::{TestApp, openai_upstream, sse_upstream, upstream_failing};

    fn chat_body(stream: bool) -> serde_json::Value {
        json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": stream,
        })
    }

    #[tokio::test]
    async fn test_missing_or_wrong_key_is_401() {
        let app = TestApp::new().await;

        let (status, body) = app
            .call_with_key("POST", "/v1/chat/completions", Some(chat_body(false)), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["detail"].is_string());

        let (status, _) = app
            .call_with_key(
                "POST",
                "/v1/chat/completions",
                Some(chat_body(false)),
                Some("wrong"),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_blank_gateway_key_rejects_everything() {
        let app = TestApp::with_key(None).await;
        let (status, _) = app
            .call_with_key("POST", "/v1/chat/completions", Some(chat_body(false)), Some(""))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_no_models_is_503() {
        let app = TestApp::new().await;
        let (status, body) = app
            .call("POST", "/v1/chat/completions", Some(chat_body(false)))
            .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_empty_messages_is_400() {
        let app = TestApp::new().await;
        let (status, _) = app
            .call(
                "POST",
                "/v1/chat/completions",
                Some(json!({"model": "gpt-4o", "messages": []})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_completion_passthrough_records_usage_and_access_log() {
        let app = TestApp::new().await;
        let upstream = openai_upstream("hello there", 10, 5).await;
        let id = app.add_model(&upstream, 1).await;
        app.set_quota(id, 1000, 500).await;

        let (status, body) = app
            .call("POST", "/v1/chat/completions", Some(chat_body(false)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["choices"][0]["message"]["content"], "hello there");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["usage"]["total_tokens"], 15);

        let (_, quota) = app.call("GET", "/api/quota", None).await;
        assert_eq!(quota["data"][0]["used_tokens"], 515);

        let logs = app.wait_for_logs("access", 1).await;
        assert_eq!(logs[0]["model_id"], id);
        assert!(app.switch_events().await.is_empty());
    }

    #[tokio::test]
    async fn test_quota_exhaustion_fails_over_to_next_model() {
        let app = TestApp::new().await;
        let first = app.add_model(&openai_upstream("from first", 3, 2).await, 1).await;
        let second = app.add_model(&openai_upstream("from second", 3, 2).await, 2).await;

        let (_, body) = app
            .call("POST", "/v1/chat/completions", Some(chat_body(false)))
            .await;
        assert_eq!(body["choices"][0]["message"]["content"], "from first");

        app.set_quota(first, 1000, 995).await;
        let (status, body) = app
            .call("POST", "/v1/chat/completions", Some(chat_body(false)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["choices"][0]["message"]["content"], "from second");

        let (_, router) = app.call("GET", "/api/router", None).await;
        assert_eq!(router["data"]["active_model_id"], second);

        let events = app.wait_for_switch_events(1).await;
        assert_eq!(events[0]["reason"], "quota_exhausted");
        assert_eq!(events[0]["from_model_id"], first);
        assert_eq!(events[0]["to_model_id"], second);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_absorbed_by_failover() {
        let app = TestApp::new().await;
        app.add_model(&upstream_failing(500).await, 1).await;
        app.add_model(&openai_upstream("backup", 3, 2).await, 2).await;

        let (status, body) = app
            .call("POST", "/v1/chat/completions", Some(chat_body(false)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["choices"][0]["message"]["content"], "backup");

        let errors = app.wait_for_logs("error", 1).await;
        assert!(errors.iter().all(|log| log["kind"] == "error"));
    }

    #[tokio::test]
    async fn test_streaming_ends_with_single_done() {
        let app = TestApp::new().await;
        let upstream = sse_upstream(&["Hel", "lo"]).await;
        app.add_model(&upstream, 1).await;

        let (status, text) = app
            .call_raw("POST", "/v1/chat/completions", Some(chat_body(true)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("Hel"));
        assert!(text.contains("lo"));
        assert_eq!(text.matches("data: [DONE]").count(), 1);
        assert!(text.trim_end().ends_with("data: [DONE]"));

        app.wait_for_logs("access", 1).await;
    }
}
