//! In-process app and local upstream stubs for handler tests.

use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

use lingmo_types::config::GatewayFileConfig;

use crate::http::router::build_router;
use crate::state::AppState;

pub const TEST_KEY: &str = "test-gateway-key";

pub struct TestApp {
    pub state: AppState,
    router: axum::Router,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_key(Some(TEST_KEY)).await
    }

    pub async fn with_key(key: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayFileConfig {
            forward_timeout_secs: 5,
            stream_timeout_secs: 5,
            connect_test_timeout_secs: 5,
            ..GatewayFileConfig::default()
        };
        let (state, _writer) = AppState::build(dir.path(), config, key).await.unwrap();
        let router = build_router(state.clone());
        Self {
            state,
            router,
            _dir: dir,
        }
    }

    pub async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call_with_key(method, uri, body, Some(TEST_KEY)).await
    }

    pub async fn call_with_key(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        key: Option<&str>,
    ) -> (StatusCode, Value) {
        let (status, text) = self.send(method, uri, body, key).await;
        (status, serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    pub async fn call_raw(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        self.send(method, uri, body, Some(TEST_KEY)).await
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        key: Option<&str>,
    ) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    /// Register an OpenAI-spec model at `api_base`. Returns its id.
    pub async fn add_model(&self, api_base: &str, priority: i64) -> i64 {
        let (status, body) = self
            .call(
                "POST",
                "/api/models",
                Some(json!({
                    "vendor": "openai",
                    "model_name": "gpt-4o-mini",
                    "api_base": api_base,
                    "credential": "sk-upstream",
                    "priority": priority,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["id"].as_i64().unwrap()
    }

    pub async fn set_quota(&self, id: i64, total: u64, used: u64) {
        let (status, body) = self
            .call(
                "PUT",
                &format!("/api/quota/{id}"),
                Some(json!({"total_tokens": total, "used_tokens": used})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    pub async fn switch_events(&self) -> Vec<Value> {
        let (_, body) = self.call("GET", "/api/switch-events", None).await;
        body["data"].as_array().cloned().unwrap_or_default()
    }

    /// Poll until at least `count` entries are listed at `uri`.
    async fn wait_for(&self, uri: &str, count: usize) -> Vec<Value> {
        for _ in 0..100 {
            let (_, body) = self.call("GET", uri, None).await;
            let items = body["data"].as_array().cloned().unwrap_or_default();
            if items.len() >= count {
                return items;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for {count} entries at {uri}");
    }

    pub async fn wait_for_logs(&self, kind: &str, count: usize) -> Vec<Value> {
        self.wait_for(&format!("/api/logs?kind={kind}"), count).await
    }

    pub async fn wait_for_switch_events(&self, count: usize) -> Vec<Value> {
        self.wait_for("/api/switch-events", count).await
    }

    pub async fn wait_for_notifications(&self, count: usize) -> Vec<Value> {
        self.wait_for("/api/notifications", count).await
    }
}

async fn spawn_upstream(app: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Upstream answering every chat call with the same OpenAI completion.
pub async fn openai_upstream(content: &str, prompt: u64, completion: u64) -> String {
    let body = json!({
        "id": "chatcmpl-upstream",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion
        }
    });
    let app = axum::Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let body = body.clone();
            async move { Json(body) }
        }),
    );
    spawn_upstream(app).await
}

/// Upstream streaming one delta per event, then `[DONE]`.
pub async fn sse_upstream(deltas: &[&str]) -> String {
    let mut text = String::new();
    for delta in deltas {
        let event = json!({
            "id": "chatcmpl-upstream",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": delta}, "finish_reason": null}]
        });
        text.push_str(&format!("data: {event}\n\n"));
    }
    text.push_str("data: [DONE]\n\n");

    let app = axum::Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let text = text.clone();
            async move { ([(header::CONTENT_TYPE, "text/event-stream")], text) }
        }),
    );
    spawn_upstream(app).await
}

/// Upstream failing every chat call with `status`.
pub async fn upstream_failing(status: u16) -> String {
    let app = axum::Router::new().route(
        "/v1/chat/completions",
        post(move || async move {
            (
                StatusCode::from_u16(status).unwrap(),
                Json(json!({"error": {"message": "upstream exploded"}})),
            )
        }),
    );
    spawn_upstream(app).await
}

/// Upstream exposing a usage API at `/usage` and a working chat endpoint.
pub async fn usage_upstream(used: u64, total: u64) -> String {
    let app = axum::Router::new()
        .route(
            "/usage",
            get(move || async move { Json(json!({"used": used, "total": total})) }),
        )
        .route(
            "/v1/chat/completions",
            post(|| async { Json(json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}]})) }),
        );
    spawn_upstream(app).await
}
