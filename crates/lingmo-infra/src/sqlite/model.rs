//! SQLite model endpoint repository.
//!
//! Credentials are encrypted with the vault before they touch disk and
//! decrypted on every read.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::Row;

use lingmo_core::repository::model::ModelRepository;
use lingmo_types::error::RepositoryError;
use lingmo_types::model::{
    ApiSpec, ConnectStatus, Credential, ModelEndpoint, ModelId, NewModelEndpoint, UsageProbe,
};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_error};
use crate::crypto::vault::VaultCrypto;

/// SQLite-backed endpoint storage.
#[derive(Clone)]
pub struct SqliteModelRepository {
    pool: DatabasePool,
    vault: Arc<VaultCrypto>,
}

impl SqliteModelRepository {
    pub fn new(pool: DatabasePool, vault: Arc<VaultCrypto>) -> Self {
        Self { pool, vault }
    }

    fn seal(&self, credential: Option<&Credential>) -> Result<Option<Vec<u8>>, RepositoryError> {
        credential
            .map(|c| {
                self.vault
                    .encrypt(c.expose().as_bytes())
                    .map_err(|_| RepositoryError::Encryption)
            })
            .transpose()
    }

    fn open(&self, row: EndpointRow) -> Result<ModelEndpoint, RepositoryError> {
        let credential = row
            .credential
            .as_deref()
            .map(|sealed| {
                self.vault
                    .decrypt_string(sealed)
                    .map(Credential::new)
                    .map_err(|_| RepositoryError::Encryption)
            })
            .transpose()?;
        row.into_endpoint(credential)
    }
}

impl ModelRepository for SqliteModelRepository {
    async fn create(&self, endpoint: &NewModelEndpoint) -> Result<ModelEndpoint, RepositoryError> {
        let now = format_datetime(&Utc::now());
        let sealed = self.seal(endpoint.credential.as_ref())?;

        let result = sqlx::query(
            r#"INSERT INTO model_endpoints (vendor, model_name, api_base, api_path, api_spec, credential, priority, enabled, params, param_mapping, usage_probe, connect_status, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&endpoint.vendor)
        .bind(&endpoint.model_name)
        .bind(&endpoint.api_base)
        .bind(&endpoint.api_path)
        .bind(endpoint.api_spec.to_string())
        .bind(sealed)
        .bind(endpoint.priority)
        .bind(endpoint.enabled)
        .bind(to_json(&endpoint.params)?)
        .bind(to_json(&endpoint.param_mapping)?)
        .bind(endpoint.usage_probe.as_ref().map(to_json).transpose()?)
        .bind(ConnectStatus::Untested.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        let id = ModelId(result.last_insert_rowid());
        tracing::debug!(model_id = %id, vendor = %endpoint.vendor, "endpoint created");

        self.get(id).await?.ok_or(RepositoryError::NotFound)
    }

    async fn get(&self, id: ModelId) -> Result<Option<ModelEndpoint>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM model_endpoints WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let row = EndpointRow::from_row(&row).map_err(query_error)?;
                Ok(Some(self.open(row)?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ModelEndpoint>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM model_endpoints ORDER BY priority, id")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let row = EndpointRow::from_row(row).map_err(query_error)?;
                self.open(row)
            })
            .collect()
    }

    async fn update(&self, endpoint: &ModelEndpoint) -> Result<ModelEndpoint, RepositoryError> {
        let sealed = self.seal(endpoint.credential.as_ref())?;

        let result = sqlx::query(
            r#"UPDATE model_endpoints SET
                   vendor = ?, model_name = ?, api_base = ?, api_path = ?, api_spec = ?,
                   credential = ?, priority = ?, enabled = ?, params = ?, param_mapping = ?,
                   usage_probe = ?, connect_status = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&endpoint.vendor)
        .bind(&endpoint.model_name)
        .bind(&endpoint.api_base)
        .bind(&endpoint.api_path)
        .bind(endpoint.api_spec.to_string())
        .bind(sealed)
        .bind(endpoint.priority)
        .bind(endpoint.enabled)
        .bind(to_json(&endpoint.params)?)
        .bind(to_json(&endpoint.param_mapping)?)
        .bind(endpoint.usage_probe.as_ref().map(to_json).transpose()?)
        .bind(endpoint.connect_status.to_string())
        .bind(format_datetime(&Utc::now()))
        .bind(endpoint.id.0)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        self.get(endpoint.id).await?.ok_or(RepositoryError::NotFound)
    }

    async fn delete(&self, id: ModelId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM model_endpoints WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn set_connect_status(
        &self,
        id: ModelId,
        status: ConnectStatus,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE model_endpoints SET connect_status = ?, updated_at = ? WHERE id = ?")
                .bind(status.to_string())
                .bind(format_datetime(&Utc::now()))
                .bind(id.0)
                .execute(&self.pool.writer)
                .await
                .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqliteModelRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteModelRepository").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Private Row types
// ---------------------------------------------------------------------------

struct EndpointRow {
    id: i64,
    vendor: String,
    model_name: String,
    api_base: String,
    api_path: String,
    api_spec: String,
    credential: Option<Vec<u8>>,
    priority: i64,
    enabled: bool,
    params: String,
    param_mapping: String,
    usage_probe: Option<String>,
    connect_status: String,
    created_at: String,
    updated_at: String,
}

impl EndpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            vendor: row.try_get("vendor")?,
            model_name: row.try_get("model_name")?,
            api_base: row.try_get("api_base")?,
            api_path: row.try_get("api_path")?,
            api_spec: row.try_get("api_spec")?,
            credential: row.try_get("credential")?,
            priority: row.try_get("priority")?,
            enabled: row.try_get("enabled")?,
            params: row.try_get("params")?,
            param_mapping: row.try_get("param_mapping")?,
            usage_probe: row.try_get("usage_probe")?,
            connect_status: row.try_get("connect_status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_endpoint(self, credential: Option<Credential>) -> Result<ModelEndpoint, RepositoryError> {
        let api_spec: ApiSpec = self.api_spec.parse().map_err(RepositoryError::Query)?;
        let connect_status: ConnectStatus =
            self.connect_status.parse().map_err(RepositoryError::Query)?;
        let params: serde_json::Map<String, serde_json::Value> = from_json(&self.params)?;
        let param_mapping: BTreeMap<String, String> = from_json(&self.param_mapping)?;
        let usage_probe: Option<UsageProbe> =
            self.usage_probe.as_deref().map(from_json).transpose()?;

        Ok(ModelEndpoint {
            id: ModelId(self.id),
            vendor: self.vendor,
            model_name: self.model_name,
            api_base: self.api_base,
            api_path: self.api_path,
            api_spec,
            credential,
            priority: self.priority,
            enabled: self.enabled,
            params,
            param_mapping,
            usage_probe,
            connect_status,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Query(format!("invalid JSON column: {e}")))
}
