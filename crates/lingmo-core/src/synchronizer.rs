//! Quota synchronizer.
//!
//! Periodically asks vendors that expose a usage API for authoritative
//! figures and overwrites the tracker's (possibly estimated) counters. Vendor
//! I/O happens on a snapshot of the registry with no lock held. Failures are
//! logged and leave the last known values in place.
//!
//! Each tick also flushes every counter to the quota repository, so usage
//! charged by the forwarder survives a restart.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lingmo_types::error::{RegistryError, RepositoryError, VendorError};
use lingmo_types::model::{ModelEndpoint, ModelId};
use lingmo_types::quota::{QuotaSnapshot, SyncType};

use crate::audit::AuditEmitter;
use crate::quota::QuotaTracker;
use crate::registry::ModelRegistry;
use crate::repository::quota::QuotaRepository;
use crate::settings::SettingsHandle;

/// Usage figures reported by a vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportedUsage {
    pub used_tokens: u64,
    /// `None` when the vendor reports consumption only; the configured total
    /// is kept.
    pub total_tokens: Option<u64>,
}

/// Fetches vendor-reported usage for an endpoint with a usage probe.
pub trait UsageReporter: Send + Sync + 'static {
    fn fetch_usage(
        &self,
        endpoint: &ModelEndpoint,
    ) -> impl Future<Output = Result<ReportedUsage, VendorError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("model {0} has no usage probe configured")]
    Unsupported(ModelId),

    #[error("model {model_id}: {source}")]
    Vendor {
        model_id: ModelId,
        #[source]
        source: VendorError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Outcome of one synchronizer pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub synced: usize,
    pub failed: usize,
}

pub struct QuotaSynchronizer<U: UsageReporter, Q: QuotaRepository> {
    reporter: U,
    repo: Q,
    registry: Arc<ModelRegistry>,
    quota: Arc<QuotaTracker>,
    audit: AuditEmitter,
    settings: Arc<SettingsHandle>,
}

impl<U: UsageReporter, Q: QuotaRepository> QuotaSynchronizer<U, Q> {
    pub fn new(
        reporter: U,
        repo: Q,
        registry: Arc<ModelRegistry>,
        quota: Arc<QuotaTracker>,
        audit: AuditEmitter,
        settings: Arc<SettingsHandle>,
    ) -> Self {
        Self {
            reporter,
            repo,
            registry,
            quota,
            audit,
            settings,
        }
    }

    /// Seed the tracker from the repository.
    pub async fn load(&self) -> Result<usize, RepositoryError> {
        let snapshots = self.repo.list().await?;
        let count = snapshots.len();
        self.quota.load(snapshots);
        Ok(count)
    }

    /// Apply authoritative figures, raise an alert on an upward crossing.
    fn apply(&self, endpoint: &ModelEndpoint, total: u64, used: u64) -> QuotaSnapshot {
        let transition = self.quota.sync(endpoint.id, total, used, SyncType::Reported);
        self.audit.quota_alert(
            transition,
            endpoint,
            self.quota.usage_ratio(endpoint.id),
            self.settings.current().alert_threshold,
        );
        self.quota.snapshot(endpoint.id)
    }

    async fn sync_endpoint(&self, endpoint: &ModelEndpoint) -> Result<QuotaSnapshot, SyncError> {
        let reported = self
            .reporter
            .fetch_usage(endpoint)
            .await
            .map_err(|source| SyncError::Vendor {
                model_id: endpoint.id,
                source,
            })?;
        let total = reported
            .total_tokens
            .unwrap_or_else(|| self.quota.snapshot(endpoint.id).total_tokens);
        let snapshot = self.apply(endpoint, total, reported.used_tokens);
        tracing::info!(
            model_id = %endpoint.id,
            used_tokens = snapshot.used_tokens,
            total_tokens = snapshot.total_tokens,
            "Quota synchronized from vendor"
        );
        Ok(snapshot)
    }

    /// Synchronize every enabled model with a usage probe, then flush.
    pub async fn run_once(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();
        let targets: Vec<_> = self
            .registry
            .list_enabled()
            .into_iter()
            .filter(|e| e.usage_probe.is_some())
            .collect();

        for endpoint in targets {
            match self.sync_endpoint(&endpoint).await {
                Ok(_) => summary.synced += 1,
                Err(err) => {
                    tracing::warn!(model_id = %endpoint.id, error = %err, "Quota sync failed");
                    summary.failed += 1;
                }
            }
        }

        if let Err(err) = self.persist().await {
            tracing::error!(error = %err, "Failed to persist quota snapshots");
        }
        summary
    }

    /// On-demand synchronization of one model.
    pub async fn sync_model(&self, id: ModelId) -> Result<QuotaSnapshot, SyncError> {
        let endpoint = self.registry.get(id)?;
        if endpoint.usage_probe.is_none() {
            return Err(SyncError::Unsupported(id));
        }
        let snapshot = self.sync_endpoint(&endpoint).await?;
        self.repo.save(&snapshot).await?;
        Ok(snapshot)
    }

    /// Operator-entered figures, treated as reported.
    pub async fn apply_manual(
        &self,
        id: ModelId,
        total: u64,
        used: u64,
    ) -> Result<QuotaSnapshot, SyncError> {
        let endpoint = self.registry.get(id)?;
        let snapshot = self.apply(&endpoint, total, used);
        tracing::info!(model_id = %id, total, used, "Quota set manually");
        self.repo.save(&snapshot).await?;
        Ok(snapshot)
    }

    /// Write every tracked counter to the repository.
    pub async fn persist(&self) -> Result<(), RepositoryError> {
        let snapshots = self.quota.snapshot_all();
        self.repo.save_all(&snapshots).await
    }

    /// Run until `cancel` fires, then flush one last time.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        tracing::info!(interval_secs = interval.as_secs(), "Quota synchronizer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let summary = self.run_once().await;
                    tracing::debug!(synced = summary.synced, failed = summary.failed, "Quota sync tick");
                }
            }
        }

        if let Err(err) = self.persist().await {
            tracing::error!(error = %err, "Failed to persist quota snapshots on shutdown");
        }
        tracing::info!("Quota synchronizer stopped");
    }
}
