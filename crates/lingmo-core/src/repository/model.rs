//! Model endpoint repository trait definition.

use lingmo_types::error::RepositoryError;
use lingmo_types::model::{ConnectStatus, ModelEndpoint, ModelId, NewModelEndpoint};

/// Repository trait for endpoint persistence.
///
/// Credentials are stored encrypted by the implementation; callers only ever
/// see decrypted `Credential` values.
pub trait ModelRepository: Send + Sync {
    /// Insert a new endpoint and return it with its assigned id.
    fn create(
        &self,
        endpoint: &NewModelEndpoint,
    ) -> impl std::future::Future<Output = Result<ModelEndpoint, RepositoryError>> + Send;

    fn get(
        &self,
        id: ModelId,
    ) -> impl std::future::Future<Output = Result<Option<ModelEndpoint>, RepositoryError>> + Send;

    /// All endpoints ordered by (priority, id).
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ModelEndpoint>, RepositoryError>> + Send;

    /// Overwrite every editable field. Returns `NotFound` for an unknown id.
    fn update(
        &self,
        endpoint: &ModelEndpoint,
    ) -> impl std::future::Future<Output = Result<ModelEndpoint, RepositoryError>> + Send;

    /// Delete an endpoint and its quota row. Returns `NotFound` for an unknown id.
    fn delete(
        &self,
        id: ModelId,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn set_connect_status(
        &self,
        id: ModelId,
        status: ConnectStatus,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
