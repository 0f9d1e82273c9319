//! Anthropic Messages API wire format.
//!
//! Streaming follows the Messages SSE protocol:
//! 1. `message_start` carries the input token count
//! 2. per block: `content_block_start` -> N x `content_block_delta` -> `content_block_stop`
//! 3. `message_delta` carries the stop reason and output token count
//! 4. `message_stop` ends the stream
//!
//! `ping` may appear anywhere and `error` may appear mid-stream. Events are
//! dispatched on the payload's `type` field, so the SSE `event:` line is not
//! needed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use lingmo_types::chat::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice,
    ChunkChoice, ChunkDelta, DecodedResponse, MessageRole, StreamChunk, Usage,
};
use lingmo_types::error::VendorError;
use lingmo_types::model::{Credential, ModelEndpoint};
use lingmo_types::quota::SyncType;

use super::estimate::estimate_usage;
use super::{DecodeContext, EncodedRequest, merge_params};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Streaming payloads, tagged by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart { message: MessageStartObj },
    ContentBlockStart {},
    ContentBlockDelta { delta: BlockDelta },
    ContentBlockStop {},
    MessageDelta {
        delta: MessageDeltaObj,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error { error: ErrorObj },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageStartObj {
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaObj {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorObj {
    #[serde(default)]
    message: String,
}

fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        other => other,
    }
    .to_string()
}

fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::Assistant => "assistant",
        _ => "user",
    }
}

pub(super) fn encode(
    endpoint: &ModelEndpoint,
    credential: Option<&Credential>,
    request: &ChatCompletionRequest,
    stream: bool,
) -> EncodedRequest {
    let typed = AnthropicRequest {
        model: endpoint.model_name.clone(),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages: request
            .conversation()
            .map(|m| AnthropicMessage {
                role: role_name(m.role),
                content: m.content.clone(),
            })
            .collect(),
        system: request.system_prompt(),
        temperature: request.temperature,
        stream,
    };
    let fields = match serde_json::to_value(&typed) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let body = merge_params(&endpoint.params, fields);

    let mut headers = vec![
        ("content-type".to_string(), "application/json".to_string()),
        ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
    ];
    if let Some(credential) = credential {
        headers.push(("x-api-key".to_string(), credential.expose().to_string()));
    }
    if stream {
        headers.push(("accept".to_string(), "text/event-stream".to_string()));
    }
    EncodedRequest::json(endpoint.url(), headers, &Value::Object(body))
}

pub(super) fn decode(
    value: &Value,
    request: &ChatCompletionRequest,
    ctx: &DecodeContext,
) -> Result<DecodedResponse, VendorError> {
    let parsed: AnthropicResponse = serde_json::from_value(value.clone())
        .map_err(|e| VendorError::malformed(format!("unexpected response shape: {e}")))?;
    if parsed.content.is_empty() && parsed.stop_reason.is_none() {
        return Err(VendorError::malformed("response has no content"));
    }

    let text: String = parsed
        .content
        .iter()
        .filter(|b| b.block_type == "text")
        .filter_map(|b| b.text.as_deref())
        .collect();

    let (usage, usage_source) = match parsed.usage {
        Some(u) => (Usage::new(u.input_tokens, u.output_tokens), SyncType::Reported),
        None => (estimate_usage(request, &text), SyncType::Estimated),
    };

    Ok(DecodedResponse {
        response: ChatCompletionResponse {
            id: ctx.id.clone(),
            object: "chat.completion".to_string(),
            created: ctx.created,
            model: ctx.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::new(MessageRole::Assistant, text),
                finish_reason: parsed.stop_reason.as_deref().map(map_stop_reason),
            }],
            usage,
        },
        usage_source,
    })
}

fn chunk(ctx: &DecodeContext, choices: Vec<ChunkChoice>, usage: Option<Usage>) -> StreamChunk {
    StreamChunk::Delta(ChatCompletionChunk {
        id: ctx.id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: ctx.created,
        model: ctx.model.clone(),
        choices,
        usage,
    })
}

pub(super) fn decode_stream_chunk(
    data: &str,
    ctx: &DecodeContext,
) -> Result<Option<StreamChunk>, VendorError> {
    let event: StreamEvent = serde_json::from_str(data)
        .map_err(|e| VendorError::malformed(format!("invalid stream event: {e}")))?;

    match event {
        StreamEvent::MessageStart { message } => {
            let usage = message
                .usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens));
            Ok(Some(chunk(
                ctx,
                vec![ChunkChoice {
                    index: 0,
                    delta: ChunkDelta {
                        role: Some(MessageRole::Assistant),
                        content: None,
                    },
                    finish_reason: None,
                }],
                usage,
            )))
        }
        StreamEvent::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        } => Ok(Some(chunk(
            ctx,
            vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some(text),
                },
                finish_reason: None,
            }],
            None,
        ))),
        StreamEvent::MessageDelta { delta, usage } => Ok(Some(chunk(
            ctx,
            vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta::default(),
                finish_reason: delta.stop_reason.as_deref().map(map_stop_reason),
            }],
            usage.map(|u| Usage::new(u.input_tokens, u.output_tokens)),
        ))),
        StreamEvent::MessageStop => Ok(Some(StreamChunk::Done)),
        StreamEvent::Error { error } => Err(VendorError::Upstream {
            status: 200,
            detail: lingmo_types::audit::truncate_detail(&error.message),
        }),
        StreamEvent::ContentBlockDelta { .. }
        | StreamEvent::ContentBlockStart {}
        | StreamEvent::ContentBlockStop {}
        | StreamEvent::Ping
        | StreamEvent::Unknown => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use crate::testing::{ctx, endpoint};
    use lingmo_types::model::ApiSpec;

    fn request_with_system() -> ChatCompletionRequest {
        ChatCompletionRequest::new(
            "gpt-4o",
            vec![
                ChatMessage::new(MessageRole::System, "Be terse."),
                ChatMessage::new(MessageRole::User, "hi"),
                ChatMessage::new(MessageRole::Assistant, "hello"),
                ChatMessage::new(MessageRole::User, "bye"),
            ],
        )
    }

    #[test]
    fn encode_extracts_system_and_defaults_max_tokens() {
        let ep = endpoint(2, 1, ApiSpec::Anthropic);
        let encoded = Adapter::Anthropic
            .encode(&ep, &request_with_system(), false)
            .unwrap();

        assert_eq!(encoded.url, "https://api.example.com/v1/messages");
        assert_eq!(encoded.header("x-api-key"), Some("sk-test"));
        assert_eq!(encoded.header("anthropic-version"), Some(ANTHROPIC_VERSION));
        assert!(encoded.header("authorization").is_none());

        let body = encoded.body_json().unwrap();
        assert_eq!(body["system"], "Be terse.");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn encode_stream_sets_flag() {
        let ep = endpoint(2, 1, ApiSpec::Anthropic);
        let mut req = request_with_system();
        req.max_tokens = Some(100);
        let body = Adapter::Anthropic
            .encode(&ep, &req, true)
            .unwrap()
            .body_json()
            .unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 100);
    }

    #[test]
    fn decode_maps_stop_reason_and_usage() {
        let body = br#"{
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": " there"}],
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 10, "output_tokens": 2}
        }"#;
        let decoded = Adapter::Anthropic
            .decode(body, &request_with_system(), &ctx())
            .unwrap();
        assert_eq!(decoded.response.content(), "Hello there");
        assert_eq!(decoded.response.choices[0].finish_reason.as_deref(), Some("length"));
        assert_eq!(decoded.response.usage, Usage::new(10, 2));
        assert_eq!(decoded.usage_source, SyncType::Reported);
    }

    #[test]
    fn stream_sequence_decodes_in_order() {
        let ctx = ctx();
        let events = [
            r#"{"type":"message_start","message":{"id":"msg_1","model":"claude","usage":{"input_tokens":25,"output_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"!"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":15}}"#,
            r#"{"type":"message_stop"}"#,
        ];

        let mut text = String::new();
        let mut usage = Usage::default();
        let mut finish = None;
        let mut done = 0;
        for data in events {
            match Adapter::Anthropic.decode_stream_chunk(data, &ctx).unwrap() {
                Some(StreamChunk::Delta(c)) => {
                    text.push_str(&c.content());
                    if let Some(u) = &c.usage {
                        usage.merge_max(u);
                    }
                    if let Some(r) = c.choices.first().and_then(|ch| ch.finish_reason.clone()) {
                        finish = Some(r);
                    }
                }
                Some(StreamChunk::Done) => done += 1,
                None => {}
            }
        }
        assert_eq!(text, "Hello!");
        assert_eq!(usage.prompt_tokens, 25);
        assert_eq!(usage.completion_tokens, 15);
        assert_eq!(finish.as_deref(), Some("stop"));
        assert_eq!(done, 1);
    }

    #[test]
    fn stream_error_event() {
        let err = Adapter::Anthropic
            .decode_stream_chunk(
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
                &ctx(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            VendorError::Upstream {
                status: 200,
                detail: "Overloaded".into()
            }
        );
    }

    #[test]
    fn non_text_deltas_are_skipped() {
        let out = Adapter::Anthropic
            .decode_stream_chunk(
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"a\""}}"#,
                &ctx(),
            )
            .unwrap();
        assert!(out.is_none());
    }
}
