//! Outbound HTTP port.
//!
//! The forwarder only ever talks to providers through [`Transport`]. The
//! reqwest implementation lives in lingmo-infra; tests use in-process mocks.

use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;

use lingmo_types::error::VendorError;

use crate::adapter::EncodedRequest;

/// A complete (non-streaming) vendor response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// SSE `data:` payloads in arrival order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<String, VendorError>> + Send + 'static>>;

/// Result of opening a streaming call.
pub enum StreamOpen {
    /// The vendor accepted the request and is sending events.
    Events(EventStream),
    /// The vendor answered with a non-2xx status before streaming.
    Rejected(TransportResponse),
}

impl std::fmt::Debug for StreamOpen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamOpen::Events(_) => f.write_str("StreamOpen::Events(<stream>)"),
            StreamOpen::Rejected(r) => f.debug_tuple("StreamOpen::Rejected").field(r).finish(),
        }
    }
}

/// Trait for sending encoded vendor requests.
///
/// Uses native async fn in traits (RPITIT). Timeouts are enforced by the
/// caller; implementations only report transport-level failures.
pub trait Transport: Send + Sync + 'static {
    /// Send a request and read the whole response body.
    fn send(
        &self,
        request: EncodedRequest,
    ) -> impl Future<Output = Result<TransportResponse, VendorError>> + Send;

    /// Send a request and, on a 2xx status, return its SSE payloads.
    fn open_stream(
        &self,
        request: EncodedRequest,
    ) -> impl Future<Output = Result<StreamOpen, VendorError>> + Send;
}
