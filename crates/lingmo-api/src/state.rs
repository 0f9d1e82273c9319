//! Application state shared across CLI commands and HTTP handlers.
//!
//! Holds the routing core and the services the handlers call. Repository
//! and transport types are pinned to the SQLite and reqwest implementations
//! here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use lingmo_core::audit::AuditEmitter;
use lingmo_core::circuit::CircuitBoard;
use lingmo_core::forwarder::{ForwardTimeouts, Forwarder};
use lingmo_core::gateway::Gateway;
use lingmo_core::quota::QuotaTracker;
use lingmo_core::registry::ModelRegistry;
use lingmo_core::router::Router;
use lingmo_core::service::{ModelService, SettingsService};
use lingmo_core::settings::SettingsHandle;
use lingmo_core::synchronizer::QuotaSynchronizer;
use lingmo_infra::audit_writer::run_audit_writer;
use lingmo_infra::config::{load_file_config, resolve_data_dir};
use lingmo_infra::crypto::vault::VaultCrypto;
use lingmo_infra::http::build_client;
use lingmo_infra::http::transport::ReqwestTransport;
use lingmo_infra::http::usage::HttpUsageReporter;
use lingmo_infra::sqlite::audit::SqliteAuditRepository;
use lingmo_infra::sqlite::config::SqliteConfigRepository;
use lingmo_infra::sqlite::model::SqliteModelRepository;
use lingmo_infra::sqlite::pool::{DatabasePool, database_url};
use lingmo_infra::sqlite::quota::SqliteQuotaRepository;
use lingmo_types::config::GatewayFileConfig;

/// Environment variable that seeds the gateway API key on first start.
pub const API_KEY_ENV: &str = "LINGMO_GATEWAY_API_KEY";

pub type LiveGateway = Gateway<ReqwestTransport>;
pub type LiveModelService = ModelService<SqliteModelRepository>;
pub type LiveSettingsService = SettingsService<SqliteConfigRepository>;
pub type LiveSynchronizer = QuotaSynchronizer<HttpUsageReporter, SqliteQuotaRepository>;

/// Shared application state.
///
/// Cheap to clone: every component sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: Arc<GatewayFileConfig>,
    pub settings: Arc<SettingsHandle>,
    pub registry: Arc<ModelRegistry>,
    pub quota: Arc<QuotaTracker>,
    pub router: Arc<Router>,
    pub gateway: Arc<LiveGateway>,
    pub models: Arc<LiveModelService>,
    pub settings_service: Arc<LiveSettingsService>,
    pub synchronizer: Arc<LiveSynchronizer>,
    pub audit_repo: Arc<SqliteAuditRepository>,
}

impl AppState {
    /// Initialize from the environment: data directory, `config.toml` and
    /// the API key seed.
    ///
    /// Also returns the handle of the audit writer task. It finishes once
    /// every clone of the state has been dropped.
    pub async fn init() -> anyhow::Result<(Self, JoinHandle<u64>)> {
        let data_dir = resolve_data_dir();
        let config = load_file_config(&data_dir).await;
        let seed = std::env::var(API_KEY_ENV).ok();
        Self::build(&data_dir, config, seed.as_deref()).await
    }

    /// Wire every component against the database under `data_dir`.
    pub async fn build(
        data_dir: &Path,
        config: GatewayFileConfig,
        seed_api_key: Option<&str>,
    ) -> anyhow::Result<(Self, JoinHandle<u64>)> {
        tokio::fs::create_dir_all(data_dir).await?;

        let db_pool = DatabasePool::new(&database_url(data_dir)).await?;
        let vault = Arc::new(VaultCrypto::from_key_file(&data_dir.join("vault.key"))?);
        let config = Arc::new(config);

        let settings = Arc::new(SettingsHandle::default());
        let settings_service = SettingsService::new(
            SqliteConfigRepository::new(db_pool.clone()),
            Arc::clone(&settings),
        );
        settings_service.load(seed_api_key).await?;

        let (audit, audit_rx) = AuditEmitter::channel(config.audit_channel_capacity);
        let audit_writer = tokio::spawn(run_audit_writer(
            SqliteAuditRepository::new(db_pool.clone()),
            audit_rx,
        ));

        let registry = Arc::new(ModelRegistry::new(Vec::new()));
        let quota = Arc::new(QuotaTracker::new(Arc::clone(&settings)));
        // An abandoned half-open probe is released after twice the forward timeout.
        let circuits = Arc::new(CircuitBoard::new(
            Arc::clone(&settings),
            config.forward_timeout() * 2,
        ));

        let models = ModelService::new(
            SqliteModelRepository::new(db_pool.clone(), vault),
            Arc::clone(&registry),
            Arc::clone(&quota),
            Arc::clone(&circuits),
        );
        let model_count = models.reload().await?;

        let router = Arc::new(Router::new(
            Arc::clone(&registry),
            Arc::clone(&quota),
            Arc::clone(&circuits),
            audit.clone(),
        ));

        let client = build_client()?;
        let forwarder = Forwarder::new(
            Arc::new(ReqwestTransport::new(client.clone())),
            Arc::clone(&circuits),
            Arc::clone(&quota),
            audit.clone(),
            Arc::clone(&settings),
            ForwardTimeouts {
                forward: config.forward_timeout(),
                stream_idle: config.stream_timeout(),
            },
        );
        let gateway = Gateway::new(
            Arc::clone(&router),
            forwarder,
            Arc::clone(&registry),
            Arc::clone(&config),
        );

        let synchronizer = QuotaSynchronizer::new(
            HttpUsageReporter::new(client, config.connect_test_timeout()),
            SqliteQuotaRepository::new(db_pool.clone()),
            Arc::clone(&registry),
            Arc::clone(&quota),
            audit,
            Arc::clone(&settings),
        );
        let quota_count = synchronizer.load().await?;

        tracing::info!(
            data_dir = %data_dir.display(),
            models = model_count,
            quotas = quota_count,
            "Application state initialized"
        );

        let state = Self {
            data_dir: data_dir.to_path_buf(),
            config,
            audit_repo: Arc::new(SqliteAuditRepository::new(db_pool.clone())),
            settings,
            registry,
            quota,
            router,
            gateway: Arc::new(gateway),
            models: Arc::new(models),
            settings_service: Arc::new(settings_service),
            synchronizer: Arc::new(synchronizer),
        };
        Ok((state, audit_writer))
    }
}
