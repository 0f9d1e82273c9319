//! Canonical chat-completion types.
//!
//! These model the OpenAI-compatible shapes that callers send and receive.
//! Vendor adapters translate between these and each provider's wire format,
//! so nothing outside an adapter ever sees a vendor payload.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::quota::SyncType;

/// Role of a message in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Inbound chat-completion request in canonical (OpenAI-compatible) form.
///
/// Fields the gateway does not interpret are kept in `extra` so the custom
/// passthrough adapter can forward them untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatCompletionRequest {
    /// Build a plain non-streaming request with no optional parameters.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: None,
            temperature: None,
            max_tokens: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Whether the caller asked for an SSE stream.
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// All system messages joined by blank lines, if there are any.
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// Messages other than system prompts, in order.
    pub fn conversation(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
    }
}

/// Token usage reported for (or estimated from) one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Merge a partial usage report by keeping the larger value per field.
    ///
    /// Streaming vendors report prompt and completion counts in separate
    /// events, and some resend cumulative totals.
    pub fn merge_max(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.max(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.max(other.completion_tokens);
        self.total_tokens = self
            .total_tokens
            .max(other.total_tokens)
            .max(self.prompt_tokens + self.completion_tokens);
    }

    /// Tokens charged against a quota.
    pub fn billable(&self) -> u64 {
        self.total_tokens
            .max(self.prompt_tokens + self.completion_tokens)
    }
}

/// One choice in a non-streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

/// Canonical non-streaming response returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatCompletionResponse {
    /// Concatenated content of every choice, in index order.
    pub fn content(&self) -> String {
        self.choices
            .iter()
            .map(|c| c.message.content.as_str())
            .collect()
    }
}

/// A decoded vendor response together with where its usage figure came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResponse {
    pub response: ChatCompletionResponse,
    pub usage_source: SyncType,
}

/// Incremental content inside a streaming chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One choice inside a streaming chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Canonical `chat.completion.chunk` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletionChunk {
    /// A chunk carrying a single text delta for choice 0.
    pub fn text(id: impl Into<String>, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some(text.into()),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Text carried by this chunk across all choices.
    pub fn content(&self) -> String {
        self.choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
            .collect()
    }
}

/// Result of decoding one upstream stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A partial canonical chunk to forward to the caller.
    Delta(ChatCompletionChunk),
    /// The upstream signalled end of stream.
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for role in [
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
        ] {
            let s = role.to_string();
            let parsed: MessageRole = s.parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn test_request_keeps_unknown_fields() {
        let json = r#"{
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "top_p": 0.5,
            "user": "abc"
        }"#;
        let req: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.model, "gpt-4o");
        assert!(!req.wants_stream());
        assert_eq!(req.extra["top_p"], 0.5);
        assert_eq!(req.extra["user"], "abc");

        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["top_p"], 0.5);
        assert!(back.get("stream").is_none());
    }

    #[test]
    fn test_null_stream_and_content_accepted() {
        let json = r#"{
            "model": "m",
            "messages": [{"role": "assistant", "content": null}],
            "stream": null
        }"#;
        let req: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        assert!(!req.wants_stream());
        assert_eq!(req.messages[0].content, "");
    }

    #[test]
    fn test_system_prompt_joins_system_messages() {
        let req = ChatCompletionRequest::new(
            "m",
            vec![
                ChatMessage::new(MessageRole::System, "be brief"),
                ChatMessage::new(MessageRole::User, "hi"),
                ChatMessage::new(MessageRole::System, "be kind"),
            ],
        );
        assert_eq!(req.system_prompt().as_deref(), Some("be brief\n\nbe kind"));
        assert_eq!(req.conversation().count(), 1);
    }

    #[test]
    fn test_usage_merge_max() {
        let mut usage = Usage::new(12, 0);
        usage.merge_max(&Usage {
            prompt_tokens: 0,
            completion_tokens: 30,
            total_tokens: 0,
        });
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.total_tokens, 42);
        assert_eq!(usage.billable(), 42);
    }

    #[test]
    fn test_chunk_serialization_omits_empty_fields() {
        let chunk = ChatCompletionChunk::text("c1", "gpt-4o", "Hel");
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["content"], "Hel");
        assert!(json["choices"][0]["delta"].get("role").is_none());
        assert!(json.get("usage").is_none());
    }
}
