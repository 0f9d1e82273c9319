//! Forwarder: one outbound call through the selected model's adapter.
//!
//! Every attempt reports its outcome to the circuit board, charges quota on
//! success and writes exactly one request log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lingmo_types::audit::{LogKind, RequestLog};
use lingmo_types::chat::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, DecodedResponse, MessageRole, Usage,
};
use lingmo_types::error::{GatewayError, VendorError};
use lingmo_types::model::ModelEndpoint;
use lingmo_types::quota::SyncType;

use crate::adapter::{Adapter, DecodeContext, EncodedRequest};
use crate::audit::AuditEmitter;
use crate::circuit::CircuitBoard;
use crate::quota::QuotaTracker;
use crate::router::Selection;
use crate::settings::SettingsHandle;
use crate::transport::{EventStream, StreamOpen, Transport};

/// Hard limits applied to outbound calls.
#[derive(Debug, Clone, Copy)]
pub struct ForwardTimeouts {
    /// Whole request for non-streaming calls, and opening a stream.
    pub forward: Duration,
    /// Maximum wait between two stream events.
    pub stream_idle: Duration,
}

/// A vendor stream that was accepted and is ready to be pumped.
pub struct OpenedStream {
    pub selection: Selection,
    pub adapter: Adapter,
    pub events: EventStream,
    pub ctx: DecodeContext,
    pub started: Instant,
}

impl std::fmt::Debug for OpenedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedStream")
            .field("model_id", &self.selection.endpoint.id)
            .field("adapter", &self.adapter)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Result of a manual connectivity test.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityReport {
    pub latency_ms: u64,
    pub reply: String,
}

pub struct Forwarder<T: Transport> {
    transport: Arc<T>,
    circuits: Arc<CircuitBoard>,
    quota: Arc<QuotaTracker>,
    audit: AuditEmitter,
    settings: Arc<SettingsHandle>,
    timeouts: ForwardTimeouts,
}

impl<T: Transport> Forwarder<T> {
    pub fn new(
        transport: Arc<T>,
        circuits: Arc<CircuitBoard>,
        quota: Arc<QuotaTracker>,
        audit: AuditEmitter,
        settings: Arc<SettingsHandle>,
        timeouts: ForwardTimeouts,
    ) -> Self {
        Self {
            transport,
            circuits,
            quota,
            audit,
            settings,
            timeouts,
        }
    }

    pub fn timeouts(&self) -> ForwardTimeouts {
        self.timeouts
    }

    fn encode(
        &self,
        selection: &Selection,
        request: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<(Adapter, EncodedRequest), GatewayError> {
        let endpoint = &selection.endpoint;
        let adapter = Adapter::for_spec(endpoint.api_spec);
        match adapter.encode(endpoint, request, stream) {
            Ok(encoded) => Ok((adapter, encoded)),
            Err(err) => {
                if selection.probe {
                    self.circuits.release_probe(endpoint.id);
                }
                tracing::warn!(model_id = %endpoint.id, error = %err, "Model is not callable");
                Err(err.into())
            }
        }
    }

    async fn send(
        &self,
        adapter: Adapter,
        encoded: EncodedRequest,
        request: &ChatCompletionRequest,
        ctx: &DecodeContext,
        limit: Duration,
    ) -> Result<DecodedResponse, VendorError> {
        let response = tokio::time::timeout(limit, self.transport.send(encoded))
            .await
            .map_err(|_| VendorError::Timeout(limit.as_millis() as u64))??;
        if !response.is_success() {
            return Err(adapter.decode_error(response.status, &response.body));
        }
        adapter.decode(&response.body, request, ctx)
    }

    /// Forward a non-streaming request to the selected model.
    pub async fn forward(
        &self,
        selection: &Selection,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let (adapter, encoded) = self.encode(selection, request, false)?;
        let ctx = DecodeContext::for_request(request);
        let endpoint = &selection.endpoint;

        tracing::debug!(model_id = %endpoint.id, url = %encoded.url, "Forwarding request");
        let started = Instant::now();
        let outcome = self
            .send(adapter, encoded, request, &ctx, self.timeouts.forward)
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(decoded) => {
                self.record_success(
                    selection,
                    &request.model,
                    decoded.response.usage,
                    decoded.usage_source,
                    latency_ms,
                    LogKind::Access,
                );
                Ok(decoded.response)
            }
            Err(err) => Err(self.record_failure(
                selection,
                &request.model,
                &err,
                latency_ms,
                LogKind::Error,
            )),
        }
    }

    /// Open a streaming call. Failures here happen before any chunk reached
    /// the caller, so the gateway may still fail over.
    pub async fn open_stream(
        &self,
        selection: &Selection,
        request: &ChatCompletionRequest,
    ) -> Result<OpenedStream, GatewayError> {
        let (adapter, encoded) = self.encode(selection, request, true)?;
        let endpoint = &selection.endpoint;
        let limit = self.timeouts.forward;

        tracing::debug!(model_id = %endpoint.id, url = %encoded.url, "Opening stream");
        let started = Instant::now();
        let opened = match tokio::time::timeout(limit, self.transport.open_stream(encoded)).await {
            Ok(Ok(StreamOpen::Events(events))) => Ok(events),
            Ok(Ok(StreamOpen::Rejected(response))) => {
                Err(adapter.decode_error(response.status, &response.body))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(VendorError::Timeout(limit.as_millis() as u64)),
        };

        match opened {
            Ok(events) => Ok(OpenedStream {
                selection: selection.clone(),
                adapter,
                events,
                ctx: DecodeContext::for_request(request),
                started,
            }),
            Err(err) => Err(self.record_failure(
                selection,
                &request.model,
                &err,
                started.elapsed().as_millis() as u64,
                LogKind::Error,
            )),
        }
    }

    /// Send a minimal request to `endpoint`.
    ///
    /// An open or half-open circuit is probed immediately, regardless of
    /// cooldown. A closed circuit is left as is and the outcome counts like
    /// any other call.
    pub async fn test_connectivity(
        &self,
        endpoint: &Arc<ModelEndpoint>,
        limit: Duration,
    ) -> Result<ConnectivityReport, GatewayError> {
        let mut request = ChatCompletionRequest::new(
            endpoint.model_name.clone(),
            vec![ChatMessage::new(MessageRole::User, "ping")],
        );
        request.max_tokens = Some(16);

        let adapter = Adapter::for_spec(endpoint.api_spec);
        let encoded = adapter.encode(endpoint, &request, false)?;
        let ctx = DecodeContext::for_request(&request);

        let selection = Selection {
            endpoint: Arc::clone(endpoint),
            probe: self.circuits.force_probe(endpoint.id),
        };
        let started = Instant::now();
        let outcome = self.send(adapter, encoded, &request, &ctx, limit).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(decoded) => {
                self.record_success(
                    &selection,
                    &request.model,
                    decoded.response.usage,
                    decoded.usage_source,
                    latency_ms,
                    LogKind::Test,
                );
                tracing::info!(model_id = %endpoint.id, latency_ms, "Connectivity test passed");
                Ok(ConnectivityReport {
                    latency_ms,
                    reply: decoded.response.content(),
                })
            }
            Err(err) => Err(self.record_failure(
                &selection,
                &request.model,
                &err,
                latency_ms,
                LogKind::Test,
            )),
        }
    }

    fn charge(&self, endpoint: &ModelEndpoint, usage: Usage, usage_source: SyncType) {
        let id = endpoint.id;
        let transition = self.quota.record_usage(id, usage.billable());
        if usage_source == SyncType::Estimated {
            self.quota.mark_estimated(id);
        }
        self.audit.quota_alert(
            transition,
            endpoint,
            self.quota.usage_ratio(id),
            self.settings.current().alert_threshold,
        );
    }

    /// Close the circuit, charge quota and log the call.
    pub(crate) fn record_success(
        &self,
        selection: &Selection,
        requested_model: &str,
        usage: Usage,
        usage_source: SyncType,
        latency_ms: u64,
        kind: LogKind,
    ) {
        let endpoint = &selection.endpoint;
        let id = endpoint.id;
        self.circuits.record_success(id, selection.probe);
        self.charge(endpoint, usage, usage_source);

        tracing::debug!(
            model_id = %id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            usage_source = %usage_source,
            latency_ms,
            "Upstream call succeeded"
        );
        self.audit.request(
            RequestLog::new(kind, Some(id), requested_model)
                .with_tokens(usage.prompt_tokens, usage.completion_tokens)
                .with_latency_ms(latency_ms),
        );
    }

    /// Count the failure against the circuit, log it and classify it.
    pub(crate) fn record_failure(
        &self,
        selection: &Selection,
        requested_model: &str,
        err: &VendorError,
        latency_ms: u64,
        kind: LogKind,
    ) -> GatewayError {
        let id = selection.endpoint.id;
        let detail = err.to_string();
        self.circuits.record_failure(id, &detail, selection.probe);
        tracing::warn!(model_id = %id, error = %detail, latency_ms, "Upstream call failed");
        self.audit.request(
            RequestLog::new(kind, Some(id), requested_model)
                .with_latency_ms(latency_ms)
                .with_detail(&detail),
        );
        err.classify(id)
    }

    /// Settle a stream the caller abandoned before it finished.
    ///
    /// Tokens produced so far are charged. The upstream is not blamed: if it
    /// delivered any event the call counts as a success, otherwise a probe
    /// slot is handed back.
    pub(crate) fn record_abandoned(
        &self,
        selection: &Selection,
        requested_model: &str,
        usage: Usage,
        usage_source: SyncType,
        latency_ms: u64,
        responsive: bool,
    ) {
        let endpoint = &selection.endpoint;
        let id = endpoint.id;
        if responsive {
            self.circuits.record_success(id, selection.probe);
        } else if selection.probe {
            self.circuits.release_probe(id);
        }
        self.charge(endpoint, usage, usage_source);

        tracing::info!(model_id = %id, latency_ms, "Client disconnected mid-stream");
        self.audit.request(
            RequestLog::new(LogKind::Access, Some(id), requested_model)
                .with_tokens(usage.prompt_tokens, usage.completion_tokens)
                .with_latency_ms(latency_ms)
                .with_detail(CLIENT_DISCONNECTED),
        );
    }
}

/// Request log detail for streams dropped by the caller.
pub const CLIENT_DISCONNECTED: &str = "client disconnected";

impl<T: Transport> Clone for Forwarder<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            circuits: Arc::clone(&self.circuits),
            quota: Arc::clone(&self.quota),
            audit: self.audit.clone(),
            settings: Arc::clone(&self.settings),
            timeouts: self.timeouts,
        }
    }
}
