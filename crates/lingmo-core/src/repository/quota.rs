//! Quota snapshot repository trait definition.

use lingmo_types::error::RepositoryError;
use lingmo_types::model::ModelId;
use lingmo_types::quota::QuotaSnapshot;

/// Durable copy of the quota tracker's counters.
pub trait QuotaRepository: Send + Sync {
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<QuotaSnapshot>, RepositoryError>> + Send;

    /// Insert or replace one snapshot.
    fn save(
        &self,
        snapshot: &QuotaSnapshot,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Insert or replace many snapshots in a single transaction.
    fn save_all(
        &self,
        snapshots: &[QuotaSnapshot],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn delete(
        &self,
        id: ModelId,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
