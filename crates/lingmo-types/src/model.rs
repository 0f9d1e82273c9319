//! Provider endpoint types.
//!
//! A [`ModelEndpoint`] is one configured upstream: vendor, model name, URL,
//! wire protocol and credential. Endpoints are created and edited through the
//! management API; the routing core only ever reads snapshots of them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Identifier of a configured endpoint (SQLite row id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub i64);

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(ModelId)
            .map_err(|_| format!("invalid model id: '{s}'"))
    }
}

/// Wire protocol spoken by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiSpec {
    OpenAi,
    Anthropic,
    Gemini,
    Custom,
}

impl ApiSpec {
    /// Whether calls under this spec cannot be made without a credential.
    pub fn requires_credential(&self) -> bool {
        !matches!(self, ApiSpec::Custom)
    }
}

impl fmt::Display for ApiSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiSpec::OpenAi => write!(f, "openai"),
            ApiSpec::Anthropic => write!(f, "anthropic"),
            ApiSpec::Gemini => write!(f, "gemini"),
            ApiSpec::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for ApiSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ApiSpec::OpenAi),
            "anthropic" => Ok(ApiSpec::Anthropic),
            "gemini" => Ok(ApiSpec::Gemini),
            "custom" => Ok(ApiSpec::Custom),
            other => Err(format!("invalid api spec: '{other}'")),
        }
    }
}

/// Provider credential.
///
/// Cloneable handle around a [`SecretString`]. Debug output is redacted and
/// the value is only exposed when building outbound request headers.
#[derive(Clone)]
pub struct Credential(Arc<SecretString>);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(secret.into())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_blank(&self) -> bool {
        self.0.expose_secret().trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Where to read vendor-reported usage for an endpoint.
///
/// `used_pointer` and `total_pointer` are RFC 6901 JSON pointers into the
/// usage API's response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageProbe {
    pub url: String,
    pub used_pointer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pointer: Option<String>,
}

/// Result of the most recent manual connectivity test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectStatus {
    Untested,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStatus::Untested => write!(f, "untested"),
            ConnectStatus::Connected => write!(f, "connected"),
            ConnectStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

impl FromStr for ConnectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "untested" => Ok(ConnectStatus::Untested),
            "connected" => Ok(ConnectStatus::Connected),
            "disconnected" => Ok(ConnectStatus::Disconnected),
            other => Err(format!("invalid connect status: '{other}'")),
        }
    }
}

/// A configured upstream provider endpoint.
#[derive(Debug, Clone)]
pub struct ModelEndpoint {
    pub id: ModelId,
    pub vendor: String,
    pub model_name: String,
    pub api_base: String,
    pub api_path: String,
    pub api_spec: ApiSpec,
    pub credential: Option<Credential>,
    /// Lower is tried first. Ties break by ascending id.
    pub priority: i64,
    pub enabled: bool,
    /// Default request parameters, overridden by caller-supplied ones.
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Canonical parameter name -> vendor parameter name.
    pub param_mapping: BTreeMap<String, String>,
    pub usage_probe: Option<UsageProbe>,
    pub connect_status: ConnectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModelEndpoint {
    /// Full URL of the chat endpoint (`api_base` + `api_path`).
    pub fn url(&self) -> String {
        format!(
            "{}{}",
            self.api_base.trim_end_matches('/'),
            self.api_path
        )
    }

    /// Whether the endpoint has everything needed to be called.
    ///
    /// Endpoints whose spec needs a credential but have none are treated as
    /// ineligible by the router.
    pub fn is_configured(&self) -> bool {
        self.config_error().is_none()
    }

    /// The first configuration problem that makes this endpoint uncallable.
    pub fn config_error(&self) -> Option<ConfigError> {
        if self.api_base.trim().is_empty() {
            return Some(ConfigError::MissingApiBase(self.id));
        }
        let has_credential = self.credential.as_ref().is_some_and(|c| !c.is_blank());
        if self.api_spec.requires_credential() && !has_credential {
            return Some(ConfigError::MissingCredential(self.id));
        }
        None
    }

    /// Ordering key used by the registry: priority, then id.
    pub fn sort_key(&self) -> (i64, ModelId) {
        (self.priority, self.id)
    }

    /// Serializable view without the credential.
    pub fn view(&self) -> ModelEndpointView {
        ModelEndpointView {
            id: self.id,
            vendor: self.vendor.clone(),
            model_name: self.model_name.clone(),
            api_base: self.api_base.clone(),
            api_path: self.api_path.clone(),
            api_spec: self.api_spec,
            has_credential: self.credential.as_ref().is_some_and(|c| !c.is_blank()),
            priority: self.priority,
            enabled: self.enabled,
            params: self.params.clone(),
            param_mapping: self.param_mapping.clone(),
            usage_probe: self.usage_probe.clone(),
            connect_status: self.connect_status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Management-facing representation of an endpoint. Never carries the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpointView {
    pub id: ModelId,
    pub vendor: String,
    pub model_name: String,
    pub api_base: String,
    pub api_path: String,
    pub api_spec: ApiSpec,
    pub has_credential: bool,
    pub priority: i64,
    pub enabled: bool,
    pub params: serde_json::Map<String, serde_json::Value>,
    pub param_mapping: BTreeMap<String, String>,
    pub usage_probe: Option<UsageProbe>,
    pub connect_status: ConnectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a new endpoint.
///
/// `api_base`, `api_path` and `api_spec` fall back to the vendor template
/// when omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateModelRequest {
    pub vendor: String,
    pub model_name: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_path: Option<String>,
    #[serde(default)]
    pub api_spec: Option<ApiSpec>,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub param_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub usage_probe: Option<UsageProbe>,
}

fn default_priority() -> i64 {
    100
}

fn default_enabled() -> bool {
    true
}

/// A fully resolved endpoint that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewModelEndpoint {
    pub vendor: String,
    pub model_name: String,
    pub api_base: String,
    pub api_path: String,
    pub api_spec: ApiSpec,
    pub credential: Option<Credential>,
    pub priority: i64,
    pub enabled: bool,
    pub params: serde_json::Map<String, serde_json::Value>,
    pub param_mapping: BTreeMap<String, String>,
    pub usage_probe: Option<UsageProbe>,
}

impl CreateModelRequest {
    /// Fill omitted location fields from the vendor template.
    pub fn resolve(self) -> Result<NewModelEndpoint, String> {
        let vendor = self.vendor.trim().to_string();
        let model_name = self.model_name.trim().to_string();
        if vendor.is_empty() {
            return Err("vendor cannot be empty".to_string());
        }
        if model_name.is_empty() {
            return Err("model_name cannot be empty".to_string());
        }
        let template = vendor_template(&vendor);
        let api_base = self
            .api_base
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| template.api_base.to_string());
        if api_base.is_empty() {
            return Err(format!("api_base is required for vendor '{vendor}'"));
        }
        Ok(NewModelEndpoint {
            vendor,
            model_name,
            api_base,
            api_path: self
                .api_path
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| template.api_path.to_string()),
            api_spec: self.api_spec.unwrap_or(template.api_spec),
            credential: non_blank_credential(self.credential),
            priority: self.priority,
            enabled: self.enabled,
            params: self.params,
            param_mapping: self.param_mapping,
            usage_probe: self.usage_probe,
        })
    }
}

/// Partial update of an endpoint. Absent fields are left untouched.
///
/// An empty `credential` string clears the stored credential.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateModelRequest {
    pub vendor: Option<String>,
    pub model_name: Option<String>,
    pub api_base: Option<String>,
    pub api_path: Option<String>,
    pub api_spec: Option<ApiSpec>,
    pub credential: Option<String>,
    pub priority: Option<i64>,
    pub enabled: Option<bool>,
    pub params: Option<serde_json::Map<String, serde_json::Value>>,
    pub param_mapping: Option<BTreeMap<String, String>>,
    pub usage_probe: Option<UsageProbe>,
}

impl UpdateModelRequest {
    pub fn apply_to(self, endpoint: &mut ModelEndpoint) {
        if let Some(v) = self.vendor {
            endpoint.vendor = v;
        }
        if let Some(v) = self.model_name {
            endpoint.model_name = v;
        }
        if let Some(v) = self.api_base {
            endpoint.api_base = v;
        }
        if let Some(v) = self.api_path {
            endpoint.api_path = v;
        }
        if let Some(v) = self.api_spec {
            endpoint.api_spec = v;
        }
        if self.credential.is_some() {
            endpoint.credential = non_blank_credential(self.credential);
        }
        if let Some(v) = self.priority {
            endpoint.priority = v;
        }
        if let Some(v) = self.enabled {
            endpoint.enabled = v;
        }
        if let Some(v) = self.params {
            endpoint.params = v;
        }
        if let Some(v) = self.param_mapping {
            endpoint.param_mapping = v;
        }
        if self.usage_probe.is_some() {
            endpoint.usage_probe = self.usage_probe;
        }
        endpoint.updated_at = Utc::now();
    }
}

fn non_blank_credential(raw: Option<String>) -> Option<Credential> {
    raw.filter(|s| !s.trim().is_empty()).map(Credential::new)
}

/// Default location and protocol for a well-known vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorTemplate {
    pub api_base: &'static str,
    pub api_path: &'static str,
    pub api_spec: ApiSpec,
}

/// Look up the template for a vendor name (case-insensitive).
///
/// Unknown vendors get an empty base, the OpenAI chat path and the custom spec.
pub fn vendor_template(vendor: &str) -> VendorTemplate {
    let (api_base, api_path, api_spec) = match vendor.to_lowercase().as_str() {
        "openai" => ("https://api.openai.com", "/v1/chat/completions", ApiSpec::OpenAi),
        "claude" | "anthropic" => ("https://api.anthropic.com", "/v1/messages", ApiSpec::Anthropic),
        "gemini" => (
            "https://generativelanguage.googleapis.com",
            "/v1beta/models/{model}:generateContent",
            ApiSpec::Gemini,
        ),
        "qwen" => (
            "https://dashscope.aliyuncs.com",
            "/compatible-mode/v1/chat/completions",
            ApiSpec::OpenAi,
        ),
        "zhipu" => (
            "https://open.bigmodel.cn",
            "/api/paas/v4/chat/completions",
            ApiSpec::OpenAi,
        ),
        "mistral" => ("https://api.mistral.ai", "/v1/chat/completions", ApiSpec::OpenAi),
        "groq" => ("https://api.groq.com", "/openai/v1/chat/completions", ApiSpec::OpenAi),
        "perplexity" => ("https://api.perplexity.ai", "/chat/completions", ApiSpec::OpenAi),
        "doubao" => (
            "https://ark.cn-beijing.volces.com",
            "/api/v3/chat/completions",
            ApiSpec::OpenAi,
        ),
        "spark" => ("https://spark-api-open.xf-yun.com", "/v1/chat/completions", ApiSpec::OpenAi),
        _ => ("", "/v1/chat/completions", ApiSpec::Custom),
    };
    VendorTemplate {
        api_base,
        api_path,
        api_spec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(spec: ApiSpec, credential: Option<&str>) -> ModelEndpoint {
        let now = Utc::now();
        ModelEndpoint {
            id: ModelId(1),
            vendor: "openai".to_string(),
            model_name: "gpt-4o".to_string(),
            api_base: "https://api.openai.com/".to_string(),
            api_path: "/v1/chat/completions".to_string(),
            api_spec: spec,
            credential: credential.map(Credential::new),
            priority: 1,
            enabled: true,
            params: serde_json::Map::new(),
            param_mapping: BTreeMap::new(),
            usage_probe: None,
            connect_status: ConnectStatus::Untested,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_api_spec_roundtrip() {
        for spec in [ApiSpec::OpenAi, ApiSpec::Anthropic, ApiSpec::Gemini, ApiSpec::Custom] {
            let parsed: ApiSpec = spec.to_string().parse().unwrap();
            assert_eq!(spec, parsed);
        }
        let json = serde_json::to_string(&ApiSpec::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let ep = endpoint(ApiSpec::OpenAi, Some("sk"));
        assert_eq!(ep.url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_is_configured_requires_credential_for_vendor_specs() {
        assert!(endpoint(ApiSpec::OpenAi, Some("sk")).is_configured());
        assert!(!endpoint(ApiSpec::OpenAi, None).is_configured());
        assert!(!endpoint(ApiSpec::Anthropic, Some("   ")).is_configured());
        assert!(endpoint(ApiSpec::Custom, None).is_configured());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::new("sk-very-secret");
        let dbg = format!("{cred:?}");
        assert!(!dbg.contains("sk-very-secret"));
        assert_eq!(cred.expose(), "sk-very-secret");
    }

    #[test]
    fn test_view_hides_secret() {
        let view = endpoint(ApiSpec::OpenAi, Some("sk-secret")).view();
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(view.has_credential);
    }

    #[test]
    fn test_vendor_template_lookup() {
        let t = vendor_template("Claude");
        assert_eq!(t.api_spec, ApiSpec::Anthropic);
        assert_eq!(t.api_path, "/v1/messages");

        let unknown = vendor_template("acme");
        assert_eq!(unknown.api_spec, ApiSpec::Custom);
        assert!(unknown.api_base.is_empty());
    }

    #[test]
    fn test_create_request_uses_template() {
        let req: CreateModelRequest = serde_json::from_str(
            r#"{"vendor": "gemini", "model_name": "gemini-1.5-pro", "credential": "k"}"#,
        )
        .unwrap();
        let new = req.resolve().unwrap();
        assert_eq!(new.api_spec, ApiSpec::Gemini);
        assert_eq!(new.api_base, "https://generativelanguage.googleapis.com");
        assert_eq!(new.priority, 100);
        assert!(new.enabled);
        assert!(new.credential.is_some());
    }

    #[test]
    fn test_create_request_unknown_vendor_needs_base() {
        let req: CreateModelRequest =
            serde_json::from_str(r#"{"vendor": "acme", "model_name": "m1"}"#).unwrap();
        assert!(req.resolve().is_err());
    }

    #[test]
    fn test_update_request_clears_credential() {
        let mut ep = endpoint(ApiSpec::OpenAi, Some("sk"));
        UpdateModelRequest {
            credential: Some(String::new()),
            priority: Some(7),
            ..Default::default()
        }
        .apply_to(&mut ep);
        assert!(ep.credential.is_none());
        assert_eq!(ep.priority, 7);
        assert!(!ep.is_configured());
    }
}
