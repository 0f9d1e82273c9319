//! Protocol adapters.
//!
//! Each `api_spec` maps to one statically known encode/decode pair. Adapters
//! are pure: given the same endpoint, request and [`DecodeContext`] they
//! produce byte-identical output. Nothing outside this module sees a vendor
//! payload.

pub mod anthropic;
pub mod custom;
pub mod estimate;
pub mod gemini;
pub mod openai;

use std::fmt;

use serde_json::{Map, Value};

use lingmo_types::audit::truncate_detail;
use lingmo_types::chat::{ChatCompletionRequest, DecodedResponse, StreamChunk};
use lingmo_types::error::{ConfigError, VendorError};
use lingmo_types::model::{ApiSpec, Credential, ModelEndpoint};

/// A vendor request ready to be sent by a `Transport`.
#[derive(Clone)]
pub struct EncodedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl EncodedRequest {
    fn json(url: String, headers: Vec<(String, String)>, body: &Value) -> Self {
        let body = serde_json::to_vec(body).unwrap_or_default();
        Self { url, headers, body }
    }

    /// Parse the body back as JSON (tests and debug logging).
    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for EncodedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("EncodedRequest")
            .field("url", &self.url)
            .field("headers", &header_names)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Identity stamped onto canonical responses and chunks.
///
/// `model` is the name the caller asked for, never the upstream model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeContext {
    pub id: String,
    pub model: String,
    pub created: i64,
}

impl DecodeContext {
    pub fn for_request(request: &ChatCompletionRequest) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::now_v7().simple()),
            model: request.model.clone(),
            created: chrono::Utc::now().timestamp(),
        }
    }
}

/// The adapter selected by an endpoint's `api_spec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    OpenAi,
    Anthropic,
    Gemini,
    Custom,
}

impl Adapter {
    pub fn for_spec(spec: ApiSpec) -> Self {
        match spec {
            ApiSpec::OpenAi => Adapter::OpenAi,
            ApiSpec::Anthropic => Adapter::Anthropic,
            ApiSpec::Gemini => Adapter::Gemini,
            ApiSpec::Custom => Adapter::Custom,
        }
    }

    /// Translate a canonical request into the endpoint's wire format.
    ///
    /// `stream` overrides the request's own flag so the gateway decides
    /// which path a request takes.
    pub fn encode(
        &self,
        endpoint: &ModelEndpoint,
        request: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<EncodedRequest, ConfigError> {
        let credential = required_credential(endpoint)?;
        if endpoint.api_base.trim().is_empty() {
            return Err(ConfigError::MissingApiBase(endpoint.id));
        }
        Ok(match self {
            Adapter::OpenAi => openai::encode(endpoint, credential, request, stream),
            Adapter::Anthropic => anthropic::encode(endpoint, credential, request, stream),
            Adapter::Gemini => gemini::encode(endpoint, credential, request, stream),
            Adapter::Custom => custom::encode(endpoint, credential, request, stream),
        })
    }

    /// Decode a successful (2xx) non-streaming body.
    pub fn decode(
        &self,
        body: &[u8],
        request: &ChatCompletionRequest,
        ctx: &DecodeContext,
    ) -> Result<DecodedResponse, VendorError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| VendorError::malformed(format!("invalid JSON: {e}")))?;
        if let Some(err) = embedded_error(&value) {
            return Err(VendorError::Upstream {
                status: 200,
                detail: err,
            });
        }
        match self {
            Adapter::OpenAi | Adapter::Custom => openai::decode(&value, request, ctx),
            Adapter::Anthropic => anthropic::decode(&value, request, ctx),
            Adapter::Gemini => gemini::decode(&value, request, ctx),
        }
    }

    /// Decode one SSE `data:` payload.
    ///
    /// `Ok(None)` means the event carries nothing for the caller (keep-alives,
    /// block boundaries).
    pub fn decode_stream_chunk(
        &self,
        data: &str,
        ctx: &DecodeContext,
    ) -> Result<Option<StreamChunk>, VendorError> {
        let data = data.trim();
        if data.is_empty() {
            return Ok(None);
        }
        match self {
            Adapter::OpenAi | Adapter::Custom => openai::decode_stream_chunk(data, ctx),
            Adapter::Anthropic => anthropic::decode_stream_chunk(data, ctx),
            Adapter::Gemini => gemini::decode_stream_chunk(data, ctx),
        }
    }

    /// Classify a non-2xx vendor response.
    pub fn decode_error(&self, status: u16, body: &[u8]) -> VendorError {
        let detail = error_detail(body);
        match status {
            401 | 403 => VendorError::Rejected { status, detail },
            429 => VendorError::RateLimited { detail },
            _ => VendorError::Upstream { status, detail },
        }
    }
}

fn required_credential(endpoint: &ModelEndpoint) -> Result<Option<&Credential>, ConfigError> {
    let credential = endpoint.credential.as_ref().filter(|c| !c.is_blank());
    if credential.is_none() && endpoint.api_spec.requires_credential() {
        return Err(ConfigError::MissingCredential(endpoint.id));
    }
    Ok(credential)
}

/// Best-effort human readable message from a vendor error body.
fn error_detail(body: &[u8]) -> String {
    let text = match serde_json::from_slice::<Value>(body) {
        Ok(value) => embedded_error(&value)
            .or_else(|| value.get("message").and_then(Value::as_str).map(str::to_string))
            .or_else(|| value.get("detail").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| value.to_string()),
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    };
    truncate_detail(&text)
}

/// `{"error": {"message": ..}}` or `{"error": ".."}`, shared by most vendors.
fn embedded_error(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::String(s) => Some(truncate_detail(s)),
        Value::Object(obj) => {
            let msg = obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(obj.clone()).to_string());
            Some(truncate_detail(&msg))
        }
        Value::Null => None,
        other => Some(truncate_detail(&other.to_string())),
    }
}

/// Copy `params` then overlay `fields`, so caller-supplied values win.
fn merge_params(params: &Map<String, Value>, fields: Map<String, Value>) -> Map<String, Value> {
    let mut body = params.clone();
    for (k, v) in fields {
        body.insert(k, v);
    }
    body
}

fn bearer_headers(credential: Option<&Credential>, stream: bool) -> Vec<(String, String)> {
    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    if let Some(credential) = credential {
        headers.push((
            "authorization".to_string(),
            format!("Bearer {}", credential.expose()),
        ));
    }
    if stream {
        headers.push(("accept".to_string(), "text/event-stream".to_string()));
    }
    headers
}
