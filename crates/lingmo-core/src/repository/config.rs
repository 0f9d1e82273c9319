//! Runtime settings repository trait definition.

use lingmo_types::error::RepositoryError;

/// Key/value store behind the runtime settings (`system_config` table).
pub trait ConfigRepository: Send + Sync {
    /// Every stored `(key, value)` pair.
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<(String, String)>, RepositoryError>> + Send;

    /// Insert or replace a value.
    fn set(
        &self,
        key: &str,
        value: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
