//! Key-addressed JSON artifact store.
//!
//! Keys are case-sensitive and slash-delimited; the naming scheme
//! (`{job_id}/{stage}.json`, `{job_id}/{stage}-result.json`) is owned by the
//! callers. Artifacts are written once and never mutated; retention is
//! out of band.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use super::PipelineDb;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("no artifact stored under '{0}'")]
    NotFound(String),
    #[error("artifact '{key}' is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize value for '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("blob storage unavailable: {0}")]
    Storage(String),
}

/// Adapter over the `artifacts` table of the pipeline database.
#[derive(Clone)]
pub struct BlobStore {
    db: PipelineDb,
}

impl BlobStore {
    pub fn new(db: PipelineDb) -> Self {
        Self { db }
    }

    /// Serialize `value` to JSON and store it under `key`, overwriting any
    /// previous artifact. Returns the key.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<String, BlobError> {
        let body = serde_json::to_string(value).map_err(|source| BlobError::Serialization {
            key: key.to_string(),
            source,
        })?;

        let conn = self.db.connection();
        let conn = conn
            .lock()
            .map_err(|e| BlobError::Storage(format!("lock poisoned: {e}")))?;
        conn.execute(
            "INSERT OR REPLACE INTO artifacts (key, body, created_at) VALUES (?1, ?2, ?3)",
            params![key, body, Utc::now().to_rfc3339()],
        )
        .map_err(|e| BlobError::Storage(e.to_string()))?;

        Ok(key.to_string())
    }

    /// Fetch and parse the artifact stored under `key`.
    pub fn get(&self, key: &str) -> Result<serde_json::Value, BlobError> {
        let conn = self.db.connection();
        let conn = conn
            .lock()
            .map_err(|e| BlobError::Storage(format!("lock poisoned: {e}")))?;

        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM artifacts WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| BlobError::Storage(e.to_string()))?;

        let body = body.ok_or_else(|| BlobError::NotFound(key.to_string()))?;
        serde_json::from_str(&body).map_err(|source| BlobError::Corrupt {
            key: key.to_string(),
            source,
        })
    }

    /// Whether an artifact exists under `key`.
    pub fn contains(&self, key: &str) -> Result<bool, BlobError> {
        let conn = self.db.connection();
        let conn = conn
            .lock()
            .map_err(|e| BlobError::Storage(format!("lock poisoned: {e}")))?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM artifacts WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map_err(|e| BlobError::Storage(e.to_string()))?;
        Ok(count > 0)
    }
}
