//! Request orchestration: select, forward, fail over.
//!
//! A request is tried against at most one model per enabled endpoint. Each
//! failed model is excluded for the rest of that request. Streaming requests
//! may only fail over while the upstream stream is being opened; once a chunk
//! has been sent to the caller the model is committed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{Stream, StreamExt};

use lingmo_types::audit::LogKind;
use lingmo_types::chat::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, StreamChunk, Usage,
};
use lingmo_types::config::GatewayFileConfig;
use lingmo_types::error::{GatewayError, VendorError};
use lingmo_types::quota::SyncType;

use crate::adapter::estimate::estimate_usage;
use crate::forwarder::{Forwarder, OpenedStream};
use crate::registry::ModelRegistry;
use crate::router::{Router, Selection};
use crate::transport::Transport;

/// One frame of a caller-facing stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Chunk(ChatCompletionChunk),
    /// The upstream failed after streaming began.
    Error(String),
    /// Always the last frame, sent exactly once.
    Done,
}

pub struct Gateway<T: Transport> {
    router: Arc<Router>,
    forwarder: Forwarder<T>,
    registry: Arc<ModelRegistry>,
    config: Arc<GatewayFileConfig>,
}

impl<T: Transport> Gateway<T> {
    pub fn new(
        router: Arc<Router>,
        forwarder: Forwarder<T>,
        registry: Arc<ModelRegistry>,
        config: Arc<GatewayFileConfig>,
    ) -> Self {
        Self {
            router,
            forwarder,
            registry,
            config,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn forwarder(&self) -> &Forwarder<T> {
        &self.forwarder
    }

    fn max_attempts(&self) -> usize {
        self.registry.enabled_count().max(1)
    }

    async fn backoff(&self, attempt: usize) {
        let delay = self.config.retry_backoff(attempt as u32);
        if !delay.is_zero() {
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::time::sleep(delay).await;
        }
    }

    /// Serve a non-streaming completion, failing over across models.
    pub async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let mut excluded = HashSet::new();
        let mut last_error = None;

        for attempt in 0..self.max_attempts() {
            self.backoff(attempt).await;
            let selection = self.router.select_model(&excluded)?;
            match self.forwarder.forward(&selection, request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    tracing::debug!(
                        attempt,
                        model_id = %selection.endpoint.id,
                        error = %err,
                        "Attempt failed, trying next model"
                    );
                    excluded.insert(selection.endpoint.id);
                    last_error = Some(err);
                }
            }
        }

        if let Some(err) = last_error {
            tracing::warn!(error = %err, "All failover attempts exhausted");
        }
        Err(GatewayError::no_eligible_provider())
    }

    /// Open an upstream stream, failing over until one is accepted.
    pub async fn open_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<GatewayStream<T>, GatewayError> {
        let mut excluded = HashSet::new();

        for attempt in 0..self.max_attempts() {
            self.backoff(attempt).await;
            let selection = self.router.select_model(&excluded)?;
            match self.forwarder.open_stream(&selection, request).await {
                Ok(opened) => {
                    return Ok(GatewayStream {
                        opened,
                        request: request.clone(),
                        forwarder: self.forwarder.clone(),
                    });
                }
                Err(err) => {
                    tracing::debug!(
                        attempt,
                        model_id = %selection.endpoint.id,
                        error = %err,
                        "Stream open failed, trying next model"
                    );
                    excluded.insert(selection.endpoint.id);
                }
            }
        }
        Err(GatewayError::no_eligible_provider())
    }
}

impl<T: Transport> Clone for Gateway<T> {
    fn clone(&self) -> Self {
        Self {
            router: Arc::clone(&self.router),
            forwarder: self.forwarder.clone(),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        }
    }
}

/// An accepted upstream stream, committed to one model.
pub struct GatewayStream<T: Transport> {
    opened: OpenedStream,
    request: ChatCompletionRequest,
    forwarder: Forwarder<T>,
}

impl<T: Transport> std::fmt::Debug for GatewayStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayStream")
            .field("opened", &self.opened)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> GatewayStream<T> {
    pub fn model_id(&self) -> lingmo_types::model::ModelId {
        self.opened.selection.endpoint.id
    }

    /// Pump the upstream into canonical frames.
    ///
    /// Usage fields are stripped from content chunks and accumulated. After
    /// the upstream finishes, accounting is recorded and one usage-only chunk
    /// is emitted. The stream always ends with a single [`StreamFrame::Done`].
    /// Dropping the stream early still settles the attempt (see
    /// [`StreamAccount`]).
    pub fn into_frames(self) -> impl Stream<Item = StreamFrame> + Send + 'static {
        let GatewayStream {
            opened,
            request,
            forwarder,
        } = self;
        let idle = forwarder.timeouts().stream_idle;

        async_stream::stream! {
            let OpenedStream { selection, adapter, mut events, ctx, started } = opened;
            let mut account = StreamAccount {
                forwarder,
                selection,
                request,
                started,
                usage: None,
                completion: String::new(),
                responsive: false,
                settled: false,
            };
            let mut failure: Option<VendorError> = None;

            loop {
                let next = match tokio::time::timeout(idle, events.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        failure = Some(VendorError::Timeout(idle.as_millis() as u64));
                        break;
                    }
                };
                let data = match next {
                    None => break,
                    Some(Ok(data)) => data,
                    Some(Err(err)) => {
                        failure = Some(err);
                        break;
                    }
                };
                account.responsive = true;
                match adapter.decode_stream_chunk(&data, &ctx) {
                    Ok(None) => {}
                    Ok(Some(StreamChunk::Done)) => break,
                    Ok(Some(StreamChunk::Delta(mut chunk))) => {
                        if let Some(reported) = chunk.usage.take() {
                            account.usage.get_or_insert_with(Usage::default).merge_max(&reported);
                        }
                        account.completion.push_str(&chunk.content());
                        if has_payload(&chunk) {
                            yield StreamFrame::Chunk(chunk);
                        }
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            match failure {
                None => {
                    let usage = account.settle_success();
                    yield StreamFrame::Chunk(ChatCompletionChunk {
                        id: ctx.id.clone(),
                        object: "chat.completion.chunk".to_string(),
                        created: ctx.created,
                        model: ctx.model.clone(),
                        choices: Vec::new(),
                        usage: Some(usage),
                    });
                }
                Some(err) => {
                    account.settle_failure(&err);
                    yield StreamFrame::Error("upstream provider failed mid-stream".to_string());
                }
            }
            yield StreamFrame::Done;
        }
    }
}

/// Accounting for one streamed attempt.
///
/// Settled exactly once: on upstream completion, on upstream failure, or on
/// drop when the caller went away first.
struct StreamAccount<T: Transport> {
    forwarder: Forwarder<T>,
    selection: Selection,
    request: ChatCompletionRequest,
    started: Instant,
    usage: Option<Usage>,
    completion: String,
    /// At least one upstream event arrived.
    responsive: bool,
    settled: bool,
}

impl<T: Transport> StreamAccount<T> {
    fn latency_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn usage(&self) -> (Usage, SyncType) {
        match self.usage {
            Some(u) if u.billable() > 0 => (u, SyncType::Reported),
            _ => (
                estimate_usage(&self.request, &self.completion),
                SyncType::Estimated,
            ),
        }
    }

    fn settle_success(&mut self) -> Usage {
        self.settled = true;
        let (usage, source) = self.usage();
        self.forwarder.record_success(
            &self.selection,
            &self.request.model,
            usage,
            source,
            self.latency_ms(),
            LogKind::Access,
        );
        usage
    }

    fn settle_failure(&mut self, err: &VendorError) {
        self.settled = true;
        self.forwarder.record_failure(
            &self.selection,
            &self.request.model,
            err,
            self.latency_ms(),
            LogKind::Error,
        );
    }
}

impl<T: Transport> Drop for StreamAccount<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let (usage, source) = self.usage();
        self.forwarder.record_abandoned(
            &self.selection,
            &self.request.model,
            usage,
            source,
            self.latency_ms(),
            self.responsive,
        );
    }
}

fn has_payload(chunk: &ChatCompletionChunk) -> bool {
    chunk.choices.iter().any(|c| {
        c.delta.role.is_some()
            || c.finish_reason.is_some()
            || c.delta.content.as_deref().is_some_and(|s| !s.is_empty())
    })
}
