//! SQLite quota snapshot persistence.

use sqlx::Row;

use lingmo_core::repository::quota::QuotaRepository;
use lingmo_types::error::RepositoryError;
use lingmo_types::model::ModelId;
use lingmo_types::quota::{QuotaSnapshot, SyncType};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_error};

const UPSERT: &str = r#"INSERT INTO model_quotas (model_id, total_tokens, used_tokens, sync_type, last_sync_time)
   VALUES (?, ?, ?, ?, ?)
   ON CONFLICT (model_id) DO UPDATE SET
       total_tokens = excluded.total_tokens,
       used_tokens = excluded.used_tokens,
       sync_type = excluded.sync_type,
       last_sync_time = excluded.last_sync_time"#;

#[derive(Debug, Clone)]
pub struct SqliteQuotaRepository {
    pool: DatabasePool,
}

impl SqliteQuotaRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn bind_snapshot<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    snapshot: &QuotaSnapshot,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(snapshot.model_id.0)
        .bind(saturating_i64(snapshot.total_tokens))
        .bind(saturating_i64(snapshot.used_tokens))
        .bind(snapshot.sync_type.to_string())
        .bind(snapshot.last_sync_time.as_ref().map(format_datetime))
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl QuotaRepository for SqliteQuotaRepository {
    async fn list(&self) -> Result<Vec<QuotaSnapshot>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM model_quotas ORDER BY model_id")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let model_id: i64 = row.try_get("model_id").map_err(query_error)?;
                let total: i64 = row.try_get("total_tokens").map_err(query_error)?;
                let used: i64 = row.try_get("used_tokens").map_err(query_error)?;
                let sync_type: String = row.try_get("sync_type").map_err(query_error)?;
                let last_sync: Option<String> = row.try_get("last_sync_time").map_err(query_error)?;

                Ok(QuotaSnapshot {
                    model_id: ModelId(model_id),
                    total_tokens: total.max(0) as u64,
                    used_tokens: used.max(0) as u64,
                    sync_type: sync_type
                        .parse::<SyncType>()
                        .map_err(RepositoryError::Query)?,
                    last_sync_time: last_sync.as_deref().map(parse_datetime).transpose()?,
                })
            })
            .collect()
    }

    async fn save(&self, snapshot: &QuotaSnapshot) -> Result<(), RepositoryError> {
        bind_snapshot(sqlx::query(UPSERT), snapshot)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn save_all(&self, snapshots: &[QuotaSnapshot]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        for snapshot in snapshots {
            // Rows for endpoints deleted since the snapshot was taken fail the FK; skip them.
            let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM model_endpoints WHERE id = ?")
                .bind(snapshot.model_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(query_error)?;
            if exists.is_none() {
                continue;
            }
            bind_snapshot(sqlx::query(UPSERT), snapshot)
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;
        }
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn delete(&self, id: ModelId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM model_quotas WHERE model_id = ?")
            .bind(id.0)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(())
    }
}
