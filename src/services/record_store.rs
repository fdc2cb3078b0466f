//! src/services/record_store.rs
//!
//! Durable mapping from file identifier to `FileRecord`, backed by SQLite.

use crate::{
    models::record::FileRecord,
    services::store::{StoreError, StoreResult},
};
use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;
use tracing::debug;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Keyed metadata storage.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create or overwrite the record keyed by `record.file_id`.
    async fn put(&self, record: &FileRecord) -> StoreResult<()>;

    /// Fetch a record, `None` when the key is unknown.
    async fn get(&self, file_id: &str) -> StoreResult<Option<FileRecord>>;

    /// Remove a record, or `StoreError::NotFound`.
    async fn delete(&self, file_id: &str) -> StoreResult<()>;

    /// Every stored record. Order carries no meaning for callers.
    async fn list_all(&self) -> StoreResult<Vec<FileRecord>>;

    /// Cheap connectivity check.
    async fn ping(&self) -> StoreResult<()>;
}

#[derive(Clone, Debug)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`, creating the database file if missing.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Close the pool, waiting for in-flight queries to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn put(&self, record: &FileRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO files (file_id, owner, description, creation_date, modification_date)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(file_id) DO UPDATE SET
                owner = excluded.owner,
                description = excluded.description,
                modification_date = excluded.modification_date
            "#,
        )
        .bind(&record.file_id)
        .bind(&record.owner)
        .bind(&record.description)
        .bind(record.creation_date)
        .bind(record.modification_date)
        .execute(&self.pool)
        .await?;

        debug!("upserted record {}", record.file_id);
        Ok(())
    }

    async fn get(&self, file_id: &str) -> StoreResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT file_id, owner, description, creation_date, modification_date
             FROM files WHERE file_id = ?",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete(&self, file_id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE file_id = ?")
            .bind(file_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(file_id.to_string()));
        }
        Ok(())
    }

    async fn list_all(&self) -> StoreResult<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(
            "SELECT file_id, owner, description, creation_date, modification_date
             FROM files ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory SQLite store on a single pinned connection, for tests.
#[cfg(test)]
pub(crate) async fn memory_store() -> SqliteRecordStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteRecordStore::new(pool);
    store.migrate().await.unwrap();
    store
}
