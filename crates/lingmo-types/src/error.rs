use thiserror::Error;

use crate::audit::truncate_detail;
use crate::model::ModelId;

/// Failure talking to one upstream provider.
///
/// Produced by adapters (status/body classification) and by the transport
/// (network errors, timeouts). Detail strings are already truncated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VendorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream timed out after {0} ms")]
    Timeout(u64),

    #[error("credential rejected by vendor (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("rate limited by vendor: {detail}")]
    RateLimited { detail: String },

    #[error("upstream error (HTTP {status}): {detail}")]
    Upstream { status: u16, detail: String },

    #[error("malformed vendor response: {0}")]
    Malformed(String),
}

impl VendorError {
    pub fn transport(detail: impl AsRef<str>) -> Self {
        VendorError::Transport(truncate_detail(detail.as_ref()))
    }

    pub fn malformed(detail: impl AsRef<str>) -> Self {
        VendorError::Malformed(truncate_detail(detail.as_ref()))
    }

    /// Whether the failure happened before a response was received.
    pub fn is_transport(&self) -> bool {
        matches!(self, VendorError::Transport(_) | VendorError::Timeout(_))
    }

    /// Place this failure in the gateway taxonomy.
    pub fn classify(&self, model_id: ModelId) -> GatewayError {
        let detail = truncate_detail(&self.to_string());
        if self.is_transport() {
            GatewayError::VendorTransport { model_id, detail }
        } else {
            GatewayError::VendorProtocol { model_id, detail }
        }
    }
}

/// Invalid or missing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown config key '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("model {0} requires a credential but none is configured")]
    MissingCredential(ModelId),

    #[error("model {0} has no api_base")]
    MissingApiBase(ModelId),
}

/// The gateway error taxonomy.
///
/// Only `Auth` and a final `NoEligibleProvider` ever reach callers of the
/// chat endpoint; vendor failures are absorbed by failover.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    NoEligibleProvider(String),

    #[error("model {model_id}: {detail}")]
    VendorTransport { model_id: ModelId, detail: String },

    #[error("model {model_id}: {detail}")]
    VendorProtocol { model_id: ModelId, detail: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GatewayError {
    pub fn no_eligible_provider() -> Self {
        GatewayError::NoEligibleProvider("no eligible model is available".to_string())
    }
}

/// Errors from the model registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("model {0} not found")]
    NotFound(ModelId),
}

/// Errors from repository operations (persistence traits live in lingmo-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("encryption error")]
    Encryption,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_error_classification() {
        let transport = VendorError::Timeout(120_000).classify(ModelId(1));
        assert!(matches!(transport, GatewayError::VendorTransport { .. }));

        let protocol = VendorError::Upstream {
            status: 500,
            detail: "boom".into(),
        }
        .classify(ModelId(1));
        assert!(matches!(protocol, GatewayError::VendorProtocol { .. }));

        let rejected = VendorError::Rejected {
            status: 401,
            detail: "bad key".into(),
        };
        assert!(!rejected.is_transport());
    }

    #[test]
    fn test_vendor_error_detail_truncated() {
        let err = VendorError::malformed("z".repeat(2000));
        if let VendorError::Malformed(detail) = &err {
            assert!(detail.chars().count() <= 257);
        } else {
            panic!("expected Malformed");
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "switch_threshold".into(),
            value: "abc".into(),
        };
        assert_eq!(err.to_string(), "invalid value 'abc' for 'switch_threshold'");
        let gw: GatewayError = err.into();
        assert!(matches!(gw, GatewayError::Config(_)));
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
