//! Google Gemini `generateContent` wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use lingmo_types::chat::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice,
    ChunkChoice, ChunkDelta, DecodedResponse, MessageRole, StreamChunk, Usage,
};
use lingmo_types::error::VendorError;
use lingmo_types::model::{Credential, ModelEndpoint};
use lingmo_types::quota::SyncType;

use super::estimate::estimate_usage;
use super::{DecodeContext, EncodedRequest};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    generation_config: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    index: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

impl GeminiCandidate {
    fn text(&self) -> String {
        self.content
            .as_ref()
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

impl From<UsageMetadata> for Usage {
    fn from(u: UsageMetadata) -> Self {
        Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u
                .total_token_count
                .max(u.prompt_token_count + u.candidates_token_count),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

fn map_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => "content_filter",
        _ => "stop",
    }
    .to_string()
}

/// Substitute `{model}` and switch to the SSE method when streaming.
fn build_url(endpoint: &ModelEndpoint, stream: bool) -> String {
    let url = endpoint.url().replace("{model}", &endpoint.model_name);
    if !stream {
        return url;
    }
    let url = url.replace(":generateContent", ":streamGenerateContent");
    if url.contains("alt=sse") {
        url
    } else if url.contains('?') {
        format!("{url}&alt=sse")
    } else {
        format!("{url}?alt=sse")
    }
}

pub(super) fn encode(
    endpoint: &ModelEndpoint,
    credential: Option<&Credential>,
    request: &ChatCompletionRequest,
    stream: bool,
) -> EncodedRequest {
    let contents = request
        .conversation()
        .map(|m| GeminiContent {
            role: Some(match m.role {
                MessageRole::Assistant => "model",
                _ => "user",
            }),
            parts: vec![GeminiPart {
                text: Some(m.content.clone()),
            }],
        })
        .collect();

    let mut generation_config = endpoint.params.clone();
    if let Some(t) = request.temperature {
        generation_config.insert("temperature".into(), json!(t));
    }
    if let Some(n) = request.max_tokens {
        generation_config.insert("maxOutputTokens".into(), json!(n));
    }

    let typed = GeminiRequest {
        contents,
        system_instruction: request.system_prompt().map(|s| GeminiContent {
            role: None,
            parts: vec![GeminiPart { text: Some(s) }],
        }),
        generation_config,
    };
    let body = serde_json::to_value(&typed).unwrap_or(Value::Null);

    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    if let Some(credential) = credential {
        headers.push(("x-goog-api-key".to_string(), credential.expose().to_string()));
    }
    if stream {
        headers.push(("accept".to_string(), "text/event-stream".to_string()));
    }
    EncodedRequest::json(build_url(endpoint, stream), headers, &body)
}

fn parse(value: Value) -> Result<GeminiResponse, VendorError> {
    serde_json::from_value(value)
        .map_err(|e| VendorError::malformed(format!("unexpected response shape: {e}")))
}

pub(super) fn decode(
    value: &Value,
    request: &ChatCompletionRequest,
    ctx: &DecodeContext,
) -> Result<DecodedResponse, VendorError> {
    let parsed = parse(value.clone())?;

    let choices: Vec<Choice> = if parsed.candidates.is_empty() {
        let blocked = parsed
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_ref())
            .is_some();
        if !blocked {
            return Err(VendorError::malformed("response has no candidates"));
        }
        vec![Choice {
            index: 0,
            message: ChatMessage::new(MessageRole::Assistant, ""),
            finish_reason: Some("content_filter".to_string()),
        }]
    } else {
        parsed
            .candidates
            .iter()
            .enumerate()
            .map(|(i, c)| Choice {
                index: c.index.unwrap_or(i as u32),
                message: ChatMessage::new(MessageRole::Assistant, c.text()),
                finish_reason: c.finish_reason.as_deref().map(map_finish_reason),
            })
            .collect()
    };

    let (usage, usage_source) = match parsed.usage_metadata {
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

/// Each SSE event is a complete `GenerateContentResponse` fragment.
/// Gemini has no end marker; the stream simply closes.
pub(super) fn decode_stream_chunk(
    data: &str,
    ctx: &DecodeContext,
) -> Result<Option<StreamChunk>, VendorError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| VendorError::malformed(format!("invalid stream event: {e}")))?;
    if let Some(detail) = super::embedded_error(&value) {
        return Err(VendorError::Upstream { status: 200, detail });
    }
    let parsed = parse(value)?;

    if parsed.candidates.is_empty() && parsed.usage_metadata.is_none() {
        return Ok(None);
    }

    let choices = parsed
        .candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let text = c.text();
            ChunkChoice {
                index: c.index.unwrap_or(i as u32),
                delta: ChunkDelta {
                    role: None,
                    content: (!text.is_empty()).then_some(text),
                },
                finish_reason: c.finish_reason.as_deref().map(map_finish_reason),
            }
        })
        .collect();

    Ok(Some(StreamChunk::Delta(ChatCompletionChunk {
        id: ctx.id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: ctx.created,
        model: ctx.model.clone(),
        choices,
        usage: parsed.usage_metadata.map(Usage::from),
    })))
}
