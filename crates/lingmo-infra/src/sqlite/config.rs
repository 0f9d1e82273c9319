//! SQLite key/value store for runtime settings (`system_config`).

use chrono::Utc;

use lingmo_core::repository::config::ConfigRepository;
use lingmo_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

#[derive(Debug, Clone)]
pub struct SqliteConfigRepository {
    pool: DatabasePool,
}

impl SqliteConfigRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl ConfigRepository for SqliteConfigRepository {
    async fn list(&self) -> Result<Vec<(String, String)>, RepositoryError> {
        sqlx::query_as::<_, (String, String)>("SELECT key, value FROM system_config ORDER BY key")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO system_config (key, value, updated_at) VALUES (?, ?, ?)
               ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;

    #[tokio::test]
    async fn set_overwrites_and_list_is_sorted() {
        let repo = SqliteConfigRepository::new(test_pool().await);
        repo.set("switch_threshold", "0.99").await.unwrap();
        repo.set("alert_threshold", "0.8").await.unwrap();
        repo.set("switch_threshold", "0.95").await.unwrap();

        let entries = repo.list().await.unwrap();
        assert_eq!(
            entries,
            vec![
                ("alert_threshold".to_string(), "0.8".to_string()),
                ("switch_threshold".to_string(), "0.95".to_string()),
            ]
        );
    }
}
