//! Durable message queues with at-least-once delivery.
//!
//! Each logical queue is a name in the shared `queue_messages` table.
//! `receive` claims messages by stamping a receipt and pushing their
//! `visible_at` past the visibility timeout; a claimed message whose receipt
//! is never deleted reappears once the timeout passes. Deletion is always
//! caller-driven - the client never acknowledges on the caller's behalf.

use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::PipelineDb;

/// How often `receive` re-checks the table while long-polling.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to serialize message body: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// A claimed message. The receipt handle is required to acknowledge it.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: i64,
    pub receipt: String,
    pub body: String,
}

/// Adapter over the `queue_messages` table of the pipeline database.
#[derive(Clone)]
pub struct QueueClient {
    db: PipelineDb,
    visibility_timeout: Duration,
}

impl QueueClient {
    pub fn new(db: PipelineDb, visibility_timeout: Duration) -> Self {
        Self {
            db,
            visibility_timeout,
        }
    }

    /// Enqueue a message. At-least-once semantics: the caller may observe
    /// duplicates downstream and must tolerate them.
    pub fn send<T: Serialize>(&self, queue: &str, body: &T) -> Result<(), QueueError> {
        let body = serde_json::to_string(body)?;
        let conn = self.db.connection();
        let conn = conn
            .lock()
            .map_err(|e| QueueError::Unavailable(format!("lock poisoned: {e}")))?;
        conn.execute(
            "INSERT INTO queue_messages (queue, body, visible_at, enqueued_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                queue,
                body,
                Utc::now().timestamp_millis(),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Long-poll for up to `max` messages, waiting at most `wait`.
    /// Returns an empty vec on timeout.
    pub async fn receive(
        &self,
        queue: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let batch = self.claim(queue, max)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Claim up to `max` currently-visible messages. One critical section so
    /// concurrent receivers never claim the same message.
    fn claim(&self, queue: &str, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let conn = self.db.connection();
        let conn = conn
            .lock()
            .map_err(|e| QueueError::Unavailable(format!("lock poisoned: {e}")))?;

        let now = Utc::now().timestamp_millis();
        let candidates: Vec<(i64, String)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT id, body FROM queue_messages
                     WHERE queue = ?1 AND visible_at <= ?2
                     ORDER BY id
                     LIMIT ?3",
                )
                .map_err(|e| QueueError::Unavailable(e.to_string()))?;
            let rows = stmt
                .query_map(params![queue, now, max as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .map_err(|e| QueueError::Unavailable(e.to_string()))?;
            rows.collect::<Result<_, _>>()
                .map_err(|e| QueueError::Unavailable(e.to_string()))?
        };

        let reappear_at = now + self.visibility_timeout.as_millis() as i64;
        let mut claimed = Vec::with_capacity(candidates.len());
        for (id, body) in candidates {
            let receipt = Uuid::new_v4().to_string();
            conn.execute(
                "UPDATE queue_messages SET receipt = ?1, visible_at = ?2 WHERE id = ?3",
                params![receipt, reappear_at, id],
            )
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
            claimed.push(QueueMessage { id, receipt, body });
        }

        Ok(claimed)
    }

    /// Acknowledge a claimed message. Idempotent: deleting an unknown or
    /// already-deleted receipt is a no-op.
    pub fn delete(&self, queue: &str, receipt: &str) -> Result<(), QueueError> {
        let conn = self.db.connection();
        let conn = conn
            .lock()
            .map_err(|e| QueueError::Unavailable(format!("lock poisoned: {e}")))?;
        conn.execute(
            "DELETE FROM queue_messages WHERE queue = ?1 AND receipt = ?2",
            params![queue, receipt],
        )
        .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Number of messages currently on a queue, visible or claimed.
    pub fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        let conn = self.db.connection();
        let conn = conn
            .lock()
            .map_err(|e| QueueError::Unavailable(format!("lock poisoned: {e}")))?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1",
                params![queue],
                |row| row.get(0),
            )
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(count as usize)
    }
}
