//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time. `DatabasePool` keeps a
//! multi-connection reader pool for concurrent reads and a single-connection
//! writer pool for serialized writes. Both use WAL journal mode and enforce
//! foreign keys (quota rows cascade with their endpoint).

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: multi-connection pool (up to 8) for SELECT queries.
/// - `writer`: single-connection pool for INSERT/UPDATE/DELETE.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open both pools and apply pending migrations on the writer.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);
        let write_opts = base_opts;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_opts)
            .await?;

        // Migrations must exist before the read-only pool opens the file.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(read_opts)
            .await?;

        Ok(Self { reader, writer })
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("reader_size", &self.reader.size())
            .field("writer_size", &self.writer.size())
            .finish()
    }
}

/// `sqlite://` URL for `lingmo.db` inside the data directory.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("lingmo.db").display())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DatabasePool {
    let dir = tempfile::tempdir().unwrap();
    let url = database_url(dir.path());
    // Keep the directory alive for the rest of the test process.
    std::mem::forget(dir);
    DatabasePool::new(&url).await.unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_creates_tables() {
        let pool = test_pool().await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in [
            "model_endpoints",
            "model_quotas",
            "notifications",
            "request_logs",
            "switch_events",
            "system_config",
        ] {
            assert!(names.contains(&expected), "{expected} table missing");
        }
    }

    #[tokio::test]
    async fn pool_uses_wal_and_foreign_keys() {
        let pool = test_pool().await;

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");

        let fk: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(fk.0, 1);
    }

    #[test]
    fn database_url_points_into_data_dir() {
        let url = database_url(Path::new("/tmp/lingmo-test"));
        assert_eq!(url, "sqlite:///tmp/lingmo-test/lingmo.db?mode=rwc");
    }
}
