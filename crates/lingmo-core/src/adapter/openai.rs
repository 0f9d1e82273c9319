//! OpenAI chat completions wire format.
//!
//! Also used to decode custom passthrough endpoints, which answer in the
//! same shape.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use lingmo_types::chat::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice,
    ChunkChoice, ChunkDelta, DecodedResponse, MessageRole, StreamChunk, Usage,
};
use lingmo_types::error::VendorError;
use lingmo_types::model::{Credential, ModelEndpoint};
use lingmo_types::quota::SyncType;

use super::estimate::estimate_usage;
use super::{DecodeContext, EncodedRequest, bearer_headers, merge_params};

/// Non-streaming response body. Lenient: only what we need.
#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    message: Option<OpenAiMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens.max(u.prompt_tokens + u.completion_tokens),
        }
    }
}

/// One `chat.completion.chunk` event.
#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChunkChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChunkChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: Option<OpenAiDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Canonical fields in OpenAI form, without `params` applied.
pub(super) fn canonical_body(
    model_name: &str,
    request: &ChatCompletionRequest,
    stream: bool,
) -> Map<String, Value> {
    let mut fields = request.extra.clone();
    fields.insert("model".into(), json!(model_name));
    fields.insert(
        "messages".into(),
        Value::Array(
            request
                .messages
                .iter()
                .map(|m| json!({"role": m.role.to_string(), "content": m.content}))
                .collect(),
        ),
    );
    if let Some(t) = request.temperature {
        fields.insert("temperature".into(), json!(t));
    }
    if let Some(n) = request.max_tokens {
        fields.insert("max_tokens".into(), json!(n));
    }
    if stream {
        fields.insert("stream".into(), json!(true));
        fields.insert("stream_options".into(), json!({"include_usage": true}));
    } else {
        fields.remove("stream");
        fields.remove("stream_options");
    }
    fields
}

pub(super) fn encode(
    endpoint: &ModelEndpoint,
    credential: Option<&Credential>,
    request: &ChatCompletionRequest,
    stream: bool,
) -> EncodedRequest {
    let body = merge_params(
        &endpoint.params,
        canonical_body(&endpoint.model_name, request, stream),
    );
    EncodedRequest::json(
        endpoint.url(),
        bearer_headers(credential, stream),
        &Value::Object(body),
    )
}

pub(super) fn decode(
    value: &Value,
    request: &ChatCompletionRequest,
    ctx: &DecodeContext,
) -> Result<DecodedResponse, VendorError> {
    let parsed: OpenAiResponse = serde_json::from_value(value.clone())
        .map_err(|e| VendorError::malformed(format!("unexpected response shape: {e}")))?;
    if parsed.choices.is_empty() {
        return Err(VendorError::malformed("response has no choices"));
    }

    let choices: Vec<Choice> = parsed
        .choices
        .into_iter()
        .map(|c| Choice {
            index: c.index,
            message: ChatMessage::new(
                MessageRole::Assistant,
                c.message.and_then(|m| m.content).unwrap_or_default(),
            ),
            finish_reason: c.finish_reason,
        })
        .collect();

    let (usage, usage_source) = match parsed.usage {
        Some(u) => (Usage::from(u), SyncType::Reported),
        None => {
            let text: String = choices.iter().map(|c| c.message.content.as_str()).collect();
            (estimate_usage(request, &text), SyncType::Estimated)
        }
    };

    Ok(DecodedResponse {
        response: ChatCompletionResponse {
            id: ctx.id.clone(),
            object: "chat.completion".to_string(),
            created: ctx.created,
            model: ctx.model.clone(),
            choices,
            usage,
        },
        usage_source,
    })
}

pub(super) fn decode_stream_chunk(
    data: &str,
    ctx: &DecodeContext,
) -> Result<Option<StreamChunk>, VendorError> {
    if data == "[DONE]" {
        return Ok(Some(StreamChunk::Done));
    }
    let value: Value = serde_json::from_str(data)
        .map_err(|e| VendorError::malformed(format!("invalid stream event: {e}")))?;
    if let Some(detail) = super::embedded_error(&value) {
        return Err(VendorError::Upstream { status: 200, detail });
    }
    let chunk: OpenAiChunk = serde_json::from_value(value)
        .map_err(|e| VendorError::malformed(format!("unexpected chunk shape: {e}")))?;

    if chunk.choices.is_empty() && chunk.usage.is_none() {
        return Ok(None);
    }

    let choices = chunk
        .choices
        .into_iter()
        .map(|c| {
            let delta = c.delta.unwrap_or(OpenAiDelta {
                role: None,
                content: None,
            });
            ChunkChoice {
                index: c.index,
                delta: ChunkDelta {
                    role: delta.role.and_then(|r| r.parse().ok()),
                    content: delta.content,
                },
                finish_reason: c.finish_reason,
            }
        })
        .collect();

    Ok(Some(StreamChunk::Delta(ChatCompletionChunk {
        id: ctx.id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: ctx.created,
        model: ctx.model.clone(),
        choices,
        usage: chunk.usage.map(Usage::from),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use crate::testing::{ctx, endpoint, user_request};
    use lingmo_types::model::ApiSpec;

    #[test]
    fn encode_uses_upstream_model_and_bearer() {
        let mut ep = endpoint(1, 1, ApiSpec::OpenAi);
        ep.model_name = "gpt-4o-2024-08-06".into();
        ep.params.insert("temperature".into(), json!(0.2));
        ep.params.insert("top_p".into(), json!(0.9));
        let mut req = user_request("hi");
        req.temperature = Some(0.7);

        let encoded = Adapter::OpenAi.encode(&ep, &req, false).unwrap();
        assert_eq!(encoded.url, "https://api.example.com/v1/chat/completions");
        assert_eq!(encoded.header("authorization"), Some("Bearer sk-test"));

        let body = encoded.body_json().unwrap();
        assert_eq!(body["model"], "gpt-4o-2024-08-06");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
        // caller value wins over endpoint params
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["top_p"], 0.9);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn encode_stream_requests_usage() {
        let ep = endpoint(1, 1, ApiSpec::OpenAi);
        let encoded = Adapter::OpenAi.encode(&ep, &user_request("hi"), true).unwrap();
        let body = encoded.body_json().unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(encoded.header("accept"), Some("text/event-stream"));
    }

    #[test]
    fn decode_with_reported_usage() {
        let body = br#"{
            "id": "chatcmpl-abc",
            "object": "chat.completion",
            "model": "gpt-4o-2024-08-06",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }"#;
        let req = user_request("hi");
        let decoded = Adapter::OpenAi.decode(body, &req, &ctx()).unwrap();
        assert_eq!(decoded.usage_source, SyncType::Reported);
        assert_eq!(decoded.response.usage, Usage::new(9, 3));
        assert_eq!(decoded.response.model, "gpt-4o");
        assert_eq!(decoded.response.id, "chatcmpl-test");
    }

    #[test]
    fn decode_without_usage_estimates() {
        let body = br#"{"choices": [{"index": 0, "message": {"content": "four words are here"}, "finish_reason": "stop"}]}"#;
        let decoded = Adapter::OpenAi.decode(body, &user_request("hi"), &ctx()).unwrap();
        assert_eq!(decoded.usage_source, SyncType::Estimated);
        assert_eq!(decoded.response.usage.completion_tokens, 5);
    }

    #[test]
    fn decode_empty_choices_is_malformed() {
        let err = Adapter::OpenAi
            .decode(br#"{"choices": []}"#, &user_request("hi"), &ctx())
            .unwrap_err();
        assert!(matches!(err, VendorError::Malformed(_)));
    }

    #[test]
    fn stream_chunks_in_order_then_done() {
        let ctx = ctx();
        let events = [
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
            "[DONE]",
        ];
        let mut text = String::new();
        let mut usage = None;
        let mut done = 0;
        for data in events {
            match Adapter::OpenAi.decode_stream_chunk(data, &ctx).unwrap() {
                Some(StreamChunk::Delta(chunk)) => {
                    text.push_str(&chunk.content());
                    if chunk.usage.is_some() {
                        usage = chunk.usage;
                    }
                }
                Some(StreamChunk::Done) => done += 1,
                None => {}
            }
        }
        assert_eq!(text, "Hello");
        assert_eq!(usage, Some(Usage::new(5, 2)));
        assert_eq!(done, 1);
    }

    #[test]
    fn stream_error_event_is_upstream_error() {
        let err = Adapter::OpenAi
            .decode_stream_chunk(r#"{"error": {"message": "server overloaded"}}"#, &ctx())
            .unwrap_err();
        assert!(matches!(err, VendorError::Upstream { .. }));
    }
}
