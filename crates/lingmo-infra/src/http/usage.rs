//! HTTP [`UsageReporter`]: reads vendor usage figures through the endpoint's
//! configured usage probe.

use std::time::Duration;

use serde_json::Value;

use lingmo_core::adapter::Adapter;
use lingmo_core::synchronizer::{ReportedUsage, UsageReporter};
use lingmo_types::error::VendorError;
use lingmo_types::model::ModelEndpoint;

#[derive(Debug, Clone)]
pub struct HttpUsageReporter {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpUsageReporter {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl UsageReporter for HttpUsageReporter {
    async fn fetch_usage(&self, endpoint: &ModelEndpoint) -> Result<ReportedUsage, VendorError> {
        let probe = endpoint
            .usage_probe
            .as_ref()
            .ok_or_else(|| VendorError::malformed("no usage probe configured"))?;

        let mut request = self.client.get(&probe.url).timeout(self.timeout);
        if let Some(credential) = endpoint.credential.as_ref().filter(|c| !c.is_blank()) {
            request = request.bearer_auth(credential.expose());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VendorError::Timeout(self.timeout.as_millis() as u64)
            } else {
                VendorError::transport(format!("usage request failed: {e}"))
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| VendorError::transport(format!("usage body failed: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(Adapter::for_spec(endpoint.api_spec).decode_error(status, &body));
        }

        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| VendorError::malformed(format!("usage body is not JSON: {e}")))?;

        let used_tokens = read_count(&value, &probe.used_pointer)?;
        let total_tokens = probe
            .total_pointer
            .as_deref()
            .map(|pointer| read_count(&value, pointer))
            .transpose()?;

        Ok(ReportedUsage {
            used_tokens,
            total_tokens,
        })
    }
}

/// Read a non-negative integer at a JSON pointer. Floats are truncated and
/// numeric strings are accepted.
fn read_count(value: &Value, pointer: &str) -> Result<u64, VendorError> {
    let found = value
        .pointer(pointer)
        .ok_or_else(|| VendorError::malformed(format!("usage field {pointer} missing")))?;

    let count = match found {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    count.ok_or_else(|| VendorError::malformed(format!("usage field {pointer} is not a count")))
}
