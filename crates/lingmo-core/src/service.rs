//! Management services behind the admin API.
//!
//! Generic over repository traits so lingmo-core never depends on
//! lingmo-infra. Every endpoint mutation reloads the registry snapshot the
//! router reads. Writes are serialized per service, so a snapshot installed
//! in memory always reflects every write that completed before it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use lingmo_types::config::{GatewaySettings, SettingKey};
use lingmo_types::error::{ConfigError, GatewayError, RepositoryError};
use lingmo_types::model::{
    ConnectStatus, CreateModelRequest, ModelEndpoint, ModelId, UpdateModelRequest,
};

use crate::circuit::CircuitBoard;
use crate::forwarder::{ConnectivityReport, Forwarder};
use crate::quota::QuotaTracker;
use crate::registry::ModelRegistry;
use crate::repository::config::ConfigRepository;
use crate::repository::model::ModelRepository;
use crate::settings::SettingsHandle;
use crate::transport::Transport;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Invalid(String),

    #[error("model {0} not found")]
    NotFound(ModelId),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Outcome of a connectivity test as shown to the operator.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ConnectivityOutcome {
    pub model_id: ModelId,
    pub connect_status: ConnectStatus,
    pub latency_ms: Option<u64>,
    pub reply: Option<String>,
    pub error: Option<String>,
}

/// Endpoint CRUD, kept in step with the in-memory registry.
pub struct ModelService<R: ModelRepository> {
    repo: R,
    registry: Arc<ModelRegistry>,
    quota: Arc<QuotaTracker>,
    circuits: Arc<CircuitBoard>,
    /// Held from a repository write until its registry reload is installed.
    writes: Mutex<()>,
}

impl<R: ModelRepository> ModelService<R> {
    pub fn new(
        repo: R,
        registry: Arc<ModelRegistry>,
        quota: Arc<QuotaTracker>,
        circuits: Arc<CircuitBoard>,
    ) -> Self {
        Self {
            repo,
            registry,
            quota,
            circuits,
            writes: Mutex::new(()),
        }
    }

    /// Replace the registry snapshot with the stored endpoints.
    pub async fn reload(&self) -> Result<usize, RepositoryError> {
        let _writes = self.writes.lock().await;
        self.reload_locked().await
    }

    /// Caller holds `writes`.
    async fn reload_locked(&self) -> Result<usize, RepositoryError> {
        let endpoints = self.repo.list().await?;
        let count = endpoints.len();
        self.registry.replace_all(endpoints);
        Ok(count)
    }

    pub async fn list(&self) -> Result<Vec<ModelEndpoint>, ServiceError> {
        Ok(self.repo.list().await?)
    }

    pub async fn get(&self, id: ModelId) -> Result<ModelEndpoint, ServiceError> {
        self.repo.get(id).await?.ok_or(ServiceError::NotFound(id))
    }

    pub async fn create(&self, request: CreateModelRequest) -> Result<ModelEndpoint, ServiceError> {
        let new = request.resolve().map_err(ServiceError::Invalid)?;
        let _writes = self.writes.lock().await;
        let created = self.repo.create(&new).await?;
        tracing::info!(
            model_id = %created.id,
            vendor = %created.vendor,
            api_spec = %created.api_spec,
            "Model endpoint created"
        );
        self.reload_locked().await?;
        Ok(created)
    }

    pub async fn update(
        &self,
        id: ModelId,
        request: UpdateModelRequest,
    ) -> Result<ModelEndpoint, ServiceError> {
        let _writes = self.writes.lock().await;
        let mut endpoint = self.get(id).await?;
        request.apply_to(&mut endpoint);
        if endpoint.vendor.trim().is_empty() || endpoint.model_name.trim().is_empty() {
            return Err(ServiceError::Invalid(
                "vendor and model_name cannot be empty".to_string(),
            ));
        }
        let updated = self.repo.update(&endpoint).await.map_err(|e| not_found(e, id))?;
        tracing::info!(model_id = %id, "Model endpoint updated");
        self.reload_locked().await?;
        Ok(updated)
    }

    pub async fn set_enabled(&self, id: ModelId, enabled: bool) -> Result<ModelEndpoint, ServiceError> {
        self.update(
            id,
            UpdateModelRequest {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
        .await
    }

    /// Delete an endpoint and forget its in-memory quota and circuit state.
    pub async fn delete(&self, id: ModelId) -> Result<(), ServiceError> {
        let _writes = self.writes.lock().await;
        self.repo.delete(id).await.map_err(|e| not_found(e, id))?;
        self.quota.remove(id);
        self.circuits.remove(id);
        tracing::info!(model_id = %id, "Model endpoint deleted");
        self.reload_locked().await?;
        Ok(())
    }

    /// Run a connectivity test and store the resulting connect status.
    pub async fn test_connectivity<T: Transport>(
        &self,
        id: ModelId,
        forwarder: &Forwarder<T>,
        limit: Duration,
    ) -> Result<ConnectivityOutcome, ServiceError> {
        let endpoint = Arc::new(self.get(id).await?);
        let result = forwarder.test_connectivity(&endpoint, limit).await;

        let outcome = match result {
            Ok(ConnectivityReport { latency_ms, reply }) => ConnectivityOutcome {
                model_id: id,
                connect_status: ConnectStatus::Connected,
                latency_ms: Some(latency_ms),
                reply: Some(reply),
                error: None,
            },
            Err(GatewayError::Config(err)) => return Err(err.into()),
            Err(err) => ConnectivityOutcome {
                model_id: id,
                connect_status: ConnectStatus::Disconnected,
                latency_ms: None,
                reply: None,
                error: Some(err.to_string()),
            },
        };

        let _writes = self.writes.lock().await;
        self.repo
            .set_connect_status(id, outcome.connect_status)
            .await
            .map_err(|e| not_found(e, id))?;
        self.reload_locked().await?;
        Ok(outcome)
    }
}

fn not_found(err: RepositoryError, id: ModelId) -> ServiceError {
    match err {
        RepositoryError::NotFound => ServiceError::NotFound(id),
        other => ServiceError::Repository(other),
    }
}

/// Runtime settings: validated, persisted, then installed.
pub struct SettingsService<R: ConfigRepository> {
    repo: R,
    handle: Arc<SettingsHandle>,
    /// Held from validation until the validated snapshot is installed.
    writes: Mutex<()>,
}

impl<R: ConfigRepository> SettingsService<R> {
    pub fn new(repo: R, handle: Arc<SettingsHandle>) -> Self {
        Self {
            repo,
            handle,
            writes: Mutex::new(()),
        }
    }

    pub fn handle(&self) -> &Arc<SettingsHandle> {
        &self.handle
    }

    /// Load stored settings into the handle.
    ///
    /// `seed_api_key` is stored as the gateway key when none is set yet.
    /// Invalid stored rows are skipped and logged.
    pub async fn load(&self, seed_api_key: Option<&str>) -> Result<(), ServiceError> {
        let _writes = self.writes.lock().await;
        let rows = self.repo.list().await?;
        let (mut settings, rejected) =
            GatewaySettings::from_entries(rows.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        for err in rejected {
            tracing::warn!(error = %err, "Ignoring stored setting");
        }

        if let Some(seed) = seed_api_key.filter(|s| !s.trim().is_empty()) {
            if settings.gateway_api_key.is_blank() {
                settings.apply(SettingKey::GatewayApiKey, seed)?;
                self.repo
                    .set(SettingKey::GatewayApiKey.as_str(), seed.trim())
                    .await?;
                tracing::info!("Gateway API key seeded from environment");
            }
        }

        if settings.gateway_api_key.is_blank() {
            tracing::warn!("No gateway API key configured, all requests will be rejected");
        }
        self.handle.install(settings);
        Ok(())
    }

    /// Current settings with the API key masked.
    pub fn public_map(&self) -> BTreeMap<String, String> {
        self.handle.current().to_public_map()
    }

    /// Validate, persist and install one setting.
    pub async fn update(&self, key: &str, raw: &str) -> Result<BTreeMap<String, String>, ServiceError> {
        let key: SettingKey = key.parse()?;
        let _writes = self.writes.lock().await;
        let next = self.handle.validate(key, raw)?;
        self.repo.set(key.as_str(), &next.raw_value(key)).await?;
        self.handle.install(next);
        tracing::info!(key = %key, "Setting updated");
        Ok(self.public_map())
    }
}
