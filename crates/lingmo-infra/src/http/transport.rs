//! reqwest-backed [`Transport`].
//!
//! Streaming responses are parsed with `eventsource-stream`; only the `data`
//! payload of each event is handed to the adapters.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;

use lingmo_core::adapter::EncodedRequest;
use lingmo_core::transport::{StreamOpen, Transport, TransportResponse};
use lingmo_types::error::VendorError;

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn request(&self, request: EncodedRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(request.body)
    }
}

fn transport_error(err: reqwest::Error) -> VendorError {
    // Display for reqwest errors can include the URL but never headers.
    VendorError::transport(format!("HTTP request failed: {err}"))
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: EncodedRequest) -> Result<TransportResponse, VendorError> {
        let response = self.request(request).send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport_error)?;

        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }

    async fn open_stream(&self, request: EncodedRequest) -> Result<StreamOpen, VendorError> {
        let response = self.request(request).send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            return Ok(StreamOpen::Rejected(TransportResponse {
                status: status.as_u16(),
                body,
            }));
        }

        let events = response.bytes_stream().eventsource().map(|event| match event {
            Ok(event) => Ok(event.data),
            Err(err) => Err(VendorError::transport(format!("stream error: {err}"))),
        });

        Ok(StreamOpen::Events(Box::pin(events)))
    }
}
