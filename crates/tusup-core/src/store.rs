//! SQLite-backed persistence for upload records
//!
//! One row per upload id. Upserts are transactional so a crash mid-update
//! never leaves a torn record; operations on the same id are serialized by
//! the manager, not here.

use crate::error::TusError;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow},
    Row,
};
use std::collections::HashMap;
use std::path::Path;
use tusup_types::{UploadRecord, UploadStatus};

/// Durable store of known uploads.
#[derive(Clone, Debug)]
pub struct UploadStore {
    pool: SqlitePool,
}

impl UploadStore {
    /// Open (or create) the store at the given path.
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, TusError> {
        let path = db_path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store, used by tests.
    pub async fn in_memory() -> Result<Self, TusError> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), TusError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS uploads (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                file_type TEXT,
                resource_url TEXT,
                byte_offset INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                headers TEXT NOT NULL DEFAULT '{}',
                metadata TEXT NOT NULL DEFAULT '{}',
                error TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_uploads_status ON uploads(status);
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Insert or replace a record, atomically per id.
    pub async fn put(&self, record: &UploadRecord) -> Result<(), TusError> {
        let headers = serde_json::to_string(&record.headers)
            .map_err(|e| TusError::Serialization(e.to_string()))?;
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| TusError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO uploads (
                id, file_path, file_size, file_type, resource_url, byte_offset,
                status, headers, metadata, error, created_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                file_path = excluded.file_path,
                file_size = excluded.file_size,
                file_type = excluded.file_type,
                resource_url = excluded.resource_url,
                byte_offset = excluded.byte_offset,
                status = excluded.status,
                headers = excluded.headers,
                metadata = excluded.metadata,
                error = excluded.error,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&record.id)
        .bind(record.file_path.to_string_lossy().to_string())
        .bind(record.file_size as i64)
        .bind(record.file_type.as_ref())
        .bind(record.resource_url.as_ref())
        .bind(record.offset as i64)
        .bind(record.status.to_string())
        .bind(headers)
        .bind(metadata)
        .bind(record.error.as_ref())
        .bind(record.created_at.to_rfc3339())
        .bind(record.completed_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load a record by id.
    pub async fn get(&self, id: &str) -> Result<Option<UploadRecord>, TusError> {
        let row = sqlx::query("SELECT * FROM uploads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_record).transpose()
    }

    /// All known records, newest first. Used at startup to discover
    /// interrupted uploads.
    pub async fn list_all(&self) -> Result<Vec<UploadRecord>, TusError> {
        let rows = sqlx::query("SELECT * FROM uploads ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    /// Delete a record.
    pub async fn delete(&self, id: &str) -> Result<(), TusError> {
        sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Persist a newly confirmed offset without rewriting the whole record.
    pub async fn update_offset(&self, id: &str, offset: u64) -> Result<(), TusError> {
        sqlx::query("UPDATE uploads SET byte_offset = ? WHERE id = ?")
            .bind(offset as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Persist a status transition.
    pub async fn update_status(
        &self,
        id: &str,
        status: UploadStatus,
        error: Option<String>,
    ) -> Result<(), TusError> {
        sqlx::query(
            r#"
            UPDATE uploads
            SET status = ?, error = ?,
                completed_at = CASE WHEN ? = 'completed' THEN strftime('%Y-%m-%dT%H:%M:%SZ', 'now') ELSE completed_at END
            WHERE id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(error)
        .bind(status.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_record(row: SqliteRow) -> Result<UploadRecord, TusError> {
    use chrono::{DateTime, Utc};
    use std::path::PathBuf;

    let status = parse_status(&row.get::<String, _>("status"));

    let headers: HashMap<String, String> =
        serde_json::from_str(&row.get::<String, _>("headers"))
            .map_err(|e| TusError::Serialization(e.to_string()))?;
    let metadata: HashMap<String, String> =
        serde_json::from_str(&row.get::<String, _>("metadata"))
            .map_err(|e| TusError::Serialization(e.to_string()))?;

    Ok(UploadRecord {
        id: row.get("id"),
        file_path: PathBuf::from(row.get::<String, _>("file_path")),
        file_size: row.get::<i64, _>("file_size") as u64,
        file_type: row.get("file_type"),
        resource_url: row.get("resource_url"),
        offset: row.get::<i64, _>("byte_offset") as u64,
        status,
        headers,
        metadata,
        error: row.get("error"),
        created_at: DateTime::parse_from_rfc3339(row.get::<String, _>("created_at").as_str())
            .map_err(|e| TusError::Serialization(e.to_string()))?
            .with_timezone(&Utc),
        completed_at: row
            .get::<Option<String>, _>("completed_at")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

fn parse_status(s: &str) -> UploadStatus {
    match s {
        "new" => UploadStatus::New,
        "creating" => UploadStatus::Creating,
        "transferring" => UploadStatus::Transferring,
        "paused" => UploadStatus::Paused,
        "completed" => UploadStatus::Completed,
        "failed" => UploadStatus::Failed,
        "canceled" => UploadStatus::Canceled,
        _ => UploadStatus::New,
    }
}
