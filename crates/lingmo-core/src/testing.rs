//! Shared fixtures and in-process fakes for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use lingmo_types::audit::{RequestLog, SwitchEvent};
use lingmo_types::chat::{ChatCompletionRequest, ChatMessage, MessageRole};
use lingmo_types::config::GatewayFileConfig;
use lingmo_types::error::{RepositoryError, VendorError};
use lingmo_types::model::{
    ApiSpec, ConnectStatus, Credential, ModelEndpoint, ModelId, NewModelEndpoint, vendor_template,
};
use lingmo_types::quota::QuotaSnapshot;

use crate::adapter::{DecodeContext, EncodedRequest};
use crate::audit::{AuditEmitter, AuditEvent};
use crate::circuit::CircuitBoard;
use crate::forwarder::{ForwardTimeouts, Forwarder};
use crate::gateway::Gateway;
use crate::quota::QuotaTracker;
use crate::registry::ModelRegistry;
use crate::repository::config::ConfigRepository;
use crate::repository::model::ModelRepository;
use crate::repository::quota::QuotaRepository;
use crate::router::Router;
use crate::settings::SettingsHandle;
use crate::synchronizer::{ReportedUsage, UsageReporter};
use crate::transport::{StreamOpen, Transport, TransportResponse};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn spec_path(spec: ApiSpec) -> &'static str {
    match spec {
        ApiSpec::OpenAi | ApiSpec::Custom => vendor_template("openai").api_path,
        ApiSpec::Anthropic => vendor_template("anthropic").api_path,
        ApiSpec::Gemini => vendor_template("gemini").api_path,
    }
}

/// An enabled, configured endpoint at `https://api.example.com`.
pub fn endpoint(id: i64, priority: i64, spec: ApiSpec) -> ModelEndpoint {
    let now = chrono::Utc::now();
    ModelEndpoint {
        id: ModelId(id),
        vendor: "test".to_string(),
        model_name: "upstream-model".to_string(),
        api_base: "https://api.example.com".to_string(),
        api_path: spec_path(spec).to_string(),
        api_spec: spec,
        credential: Some(Credential::new("sk-test")),
        priority,
        enabled: true,
        params: serde_json::Map::new(),
        param_mapping: BTreeMap::new(),
        usage_probe: None,
        connect_status: ConnectStatus::Untested,
        created_at: now,
        updated_at: now,
    }
}

/// Like [`endpoint`] but on its own host, so [`MockTransport`] can route by id.
pub fn endpoint_at(id: i64, priority: i64, spec: ApiSpec) -> ModelEndpoint {
    let mut ep = endpoint(id, priority, spec);
    ep.api_base = host(id);
    ep
}

fn host(id: i64) -> String {
    format!("https://m{id}.example.com")
}

pub fn user_request(text: &str) -> ChatCompletionRequest {
    ChatCompletionRequest::new("gpt-4o", vec![ChatMessage::new(MessageRole::User, text)])
}

pub fn ctx() -> DecodeContext {
    DecodeContext {
        id: "chatcmpl-test".to_string(),
        model: "gpt-4o".to_string(),
        created: 1_700_000_000,
    }
}

/// OpenAI-shaped completion body with reported usage.
pub fn openai_body(content: &str, prompt: u64, completion: u64) -> String {
    json!({
        "id": "chatcmpl-upstream",
        "object": "chat.completion",
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
    })
    .to_string()
}

/// OpenAI-shaped stream event carrying one text delta.
pub fn sse_text(text: &str) -> String {
    json!({"choices": [{"index": 0, "delta": {"content": text}}]}).to_string()
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Scripted upstream behaviour.
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(TransportResponse),
    Fail(VendorError),
    Stream(Vec<Result<String, VendorError>>),
    /// Never answers.
    Hang,
}

impl MockReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        MockReply::Respond(TransportResponse {
            status,
            body: body.into().into_bytes(),
        })
    }
}

#[derive(Debug, Default)]
struct MockState {
    replies: HashMap<i64, MockReply>,
    calls: HashMap<i64, usize>,
    last_body: HashMap<i64, Value>,
}

/// Transport answering per endpoint host (see [`endpoint_at`]).
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn set(&self, id: i64, reply: MockReply) {
        self.state.lock().unwrap().replies.insert(id, reply);
    }

    pub fn calls(&self, id: i64) -> usize {
        self.state.lock().unwrap().calls.get(&id).copied().unwrap_or(0)
    }

    pub fn last_body(&self, id: i64) -> Option<Value> {
        self.state.lock().unwrap().last_body.get(&id).cloned()
    }

    fn take(&self, request: &EncodedRequest) -> Option<MockReply> {
        let mut state = self.state.lock().unwrap();
        let id = state
            .replies
            .keys()
            .copied()
            .find(|id| request.url.starts_with(&format!("{}/", host(*id))))?;
        *state.calls.entry(id).or_default() += 1;
        if let Some(body) = request.body_json() {
            state.last_body.insert(id, body);
        }
        state.replies.get(&id).cloned()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: EncodedRequest) -> Result<TransportResponse, VendorError> {
        match self.take(&request) {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(err)) => Err(err),
            Some(MockReply::Stream(_)) => Err(VendorError::malformed("unexpected stream")),
            Some(MockReply::Hang) => std::future::pending().await,
            None => Err(VendorError::transport(format!("no route to {}", request.url))),
        }
    }

    async fn open_stream(&self, request: EncodedRequest) -> Result<StreamOpen, VendorError> {
        match self.take(&request) {
            Some(MockReply::Stream(items)) => {
                Ok(StreamOpen::Events(Box::pin(futures_util::stream::iter(items))))
            }
            Some(MockReply::Respond(response)) if response.is_success() => {
                let body = String::from_utf8_lossy(&response.body).to_string();
                Ok(StreamOpen::Events(Box::pin(futures_util::stream::iter(vec![Ok(body)]))))
            }
            Some(MockReply::Respond(response)) => Ok(StreamOpen::Rejected(response)),
            Some(MockReply::Fail(err)) => Err(err),
            Some(MockReply::Hang) => std::future::pending().await,
            None => Err(VendorError::transport(format!("no route to {}", request.url))),
        }
    }
}

// ---------------------------------------------------------------------------
// Usage reporter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MockReporter {
    replies: Arc<Mutex<HashMap<i64, Result<ReportedUsage, VendorError>>>>,
}

impl MockReporter {
    pub fn set(&self, id: i64, reply: Result<ReportedUsage, VendorError>) {
        self.replies.lock().unwrap().insert(id, reply);
    }
}

impl UsageReporter for MockReporter {
    async fn fetch_usage(&self, endpoint: &ModelEndpoint) -> Result<ReportedUsage, VendorError> {
        self.replies
            .lock()
            .unwrap()
            .get(&endpoint.id.0)
            .cloned()
            .unwrap_or_else(|| Err(VendorError::transport("no usage scripted")))
    }
}

// ---------------------------------------------------------------------------
// In-memory repositories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryModelRepository {
    rows: Arc<Mutex<BTreeMap<ModelId, ModelEndpoint>>>,
}

impl MemoryModelRepository {
    pub fn insert(&self, endpoint: ModelEndpoint) {
        self.rows.lock().unwrap().insert(endpoint.id, endpoint);
    }
}

impl ModelRepository for MemoryModelRepository {
    async fn create(&self, new: &NewModelEndpoint) -> Result<ModelEndpoint, RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        let id = ModelId(rows.keys().last().map(|id| id.0 + 1).unwrap_or(1));
        let now = chrono::Utc::now();
        let endpoint = ModelEndpoint {
            id,
            vendor: new.vendor.clone(),
            model_name: new.model_name.clone(),
            api_base: new.api_base.clone(),
            api_path: new.api_path.clone(),
            api_spec: new.api_spec,
            credential: new.credential.clone(),
            priority: new.priority,
            enabled: new.enabled,
            params: new.params.clone(),
            param_mapping: new.param_mapping.clone(),
            usage_probe: new.usage_probe.clone(),
            connect_status: ConnectStatus::Untested,
            created_at: now,
            updated_at: now,
        };
        rows.insert(id, endpoint.clone());
        Ok(endpoint)
    }

    async fn get(&self, id: ModelId) -> Result<Option<ModelEndpoint>, RepositoryError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<ModelEndpoint>, RepositoryError> {
        let mut all: Vec<_> = self.rows.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|e| e.sort_key());
        Ok(all)
    }

    async fn update(&self, endpoint: &ModelEndpoint) -> Result<ModelEndpoint, RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&endpoint.id).ok_or(RepositoryError::NotFound)?;
        *row = endpoint.clone();
        Ok(endpoint.clone())
    }

    async fn delete(&self, id: ModelId) -> Result<(), RepositoryError> {
        self.rows
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn set_connect_status(
        &self,
        id: ModelId,
        status: ConnectStatus,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        row.connect_status = status;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryQuotaRepository {
    rows: Arc<Mutex<BTreeMap<ModelId, QuotaSnapshot>>>,
}

impl MemoryQuotaRepository {
    pub fn snapshots(&self) -> BTreeMap<ModelId, QuotaSnapshot> {
        self.rows.lock().unwrap().clone()
    }
}

impl QuotaRepository for MemoryQuotaRepository {
    async fn list(&self) -> Result<Vec<QuotaSnapshot>, RepositoryError> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn save(&self, snapshot: &QuotaSnapshot) -> Result<(), RepositoryError> {
        self.rows
            .lock()
            .unwrap()
            .insert(snapshot.model_id, snapshot.clone());
        Ok(())
    }

    async fn save_all(&self, snapshots: &[QuotaSnapshot]) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        for snapshot in snapshots {
            rows.insert(snapshot.model_id, snapshot.clone());
        }
        Ok(())
    }

    async fn delete(&self, id: ModelId) -> Result<(), RepositoryError> {
        self.rows.lock().unwrap().remove(&id);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConfigRepository {
    rows: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryConfigRepository {
    pub fn value(&self, key: &str) -> Option<String> {
        self.rows.lock().unwrap().get(key).cloned()
    }
}

impl ConfigRepository for MemoryConfigRepository {
    async fn list(&self) -> Result<Vec<(String, String)>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        self.rows
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// The routing core wired to a [`MockTransport`] and a held audit receiver.
pub struct Harness {
    pub settings: Arc<SettingsHandle>,
    pub registry: Arc<ModelRegistry>,
    pub quota: Arc<QuotaTracker>,
    pub circuits: Arc<CircuitBoard>,
    pub audit: AuditEmitter,
    pub events: mpsc::Receiver<AuditEvent>,
    pub router: Arc<Router>,
    pub transport: MockTransport,
    pub config: GatewayFileConfig,
}

impl Harness {
    pub fn new(endpoints: Vec<ModelEndpoint>) -> Self {
        Self::with_config(endpoints, GatewayFileConfig::default())
    }

    pub fn with_config(endpoints: Vec<ModelEndpoint>, config: GatewayFileConfig) -> Self {
        let settings = Arc::new(SettingsHandle::default());
        let registry = Arc::new(ModelRegistry::new(endpoints));
        let quota = Arc::new(QuotaTracker::new(Arc::clone(&settings)));
        let circuits = Arc::new(CircuitBoard::new(
            Arc::clone(&settings),
            Duration::from_millis(400),
        ));
        let (audit, events) = AuditEmitter::channel(1024);
        let router = Arc::new(Router::new(
            Arc::clone(&registry),
            Arc::clone(&quota),
            Arc::clone(&circuits),
            audit.clone(),
        ));
        Self {
            settings,
            registry,
            quota,
            circuits,
            audit,
            events,
            router,
            transport: MockTransport::default(),
            config,
        }
    }

    pub fn forwarder(&self) -> Forwarder<MockTransport> {
        Forwarder::new(
            Arc::new(self.transport.clone()),
            Arc::clone(&self.circuits),
            Arc::clone(&self.quota),
            self.audit.clone(),
            Arc::clone(&self.settings),
            ForwardTimeouts {
                forward: Duration::from_millis(200),
                stream_idle: Duration::from_millis(500),
            },
        )
    }

    pub fn gateway(&self) -> Gateway<MockTransport> {
        Gateway::new(
            Arc::clone(&self.router),
            self.forwarder(),
            Arc::clone(&self.registry),
            Arc::new(self.config.clone()),
        )
    }

    /// Every audit event emitted since the last drain.
    pub fn drain(&mut self) -> Vec<AuditEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn switch_events(&mut self) -> Vec<SwitchEvent> {
        self.drain()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::Switch(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn request_logs(&mut self) -> Vec<RequestLog> {
        self.drain()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::Request(l) => Some(l),
                _ => None,
            })
            .collect()
    }
}
