//! # Pipeline Substrate
//!
//! Single SQLite database backing both the artifact blob store and the
//! per-stage message queues. Consolidates all durable orchestrator state
//! into one file under the data directory.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

mod blobs;
mod queue;

pub use blobs::{BlobError, BlobStore};
pub use queue::{QueueClient, QueueError, QueueMessage};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Shared handle to the orchestrator database.
#[derive(Clone)]
pub struct PipelineDb {
    conn: Arc<Mutex<Connection>>,
}

impl PipelineDb {
    /// Open or create the database at a specific path.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open pipeline database")?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory pipeline database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get the shared connection for use by the store adapters.
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run schema migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    /// Migration to version 1 - complete schema
    fn migrate_v1(conn: &Connection) -> Result<()> {
        // Artifacts: one JSON document per key, never mutated after write
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Queue messages: visible_at in the future means claimed (or delayed);
        // a claimed message whose receipt is never deleted becomes visible
        // again once visible_at passes
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                body TEXT NOT NULL,
                visible_at INTEGER NOT NULL,
                receipt TEXT,
                enqueued_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_queue_visibility
             ON queue_messages (queue, visible_at)",
            [],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.db");

        let db = PipelineDb::open_at(&path).unwrap();
        drop(db);

        // Reopening must not fail or re-run migrations destructively
        let db = PipelineDb::open_at(&path).unwrap();
        let conn = db.connection();
        let conn = conn.lock().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
