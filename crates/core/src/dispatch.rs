//! # Stage Dispatcher
//!
//! Writes a stage's input artifact, then enqueues the task message pointing
//! at it. The blob write always lands before the queue send so a worker
//! never receives a dangling `payload_key`. A crash between the two leaves
//! only an orphaned artifact; the retry overwrites it identically, which is
//! what makes dispatch idempotent up to blob overwrite.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::messages::StageTask;
use crate::stage::Stage;
use crate::store::{BlobStore, QueueClient};

/// Queue sends are retried this many times before the dispatch fails.
const SEND_ATTEMPTS: u32 = 3;

/// Delay before retry `attempt` (1-based) of a failed queue send.
fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2u64.pow(attempt.saturating_sub(1)))
}

pub struct StageDispatcher {
    blobs: BlobStore,
    queue: QueueClient,
}

impl StageDispatcher {
    pub fn new(blobs: BlobStore, queue: QueueClient) -> Self {
        Self { blobs, queue }
    }

    /// Persist `input` under the stage's input key and enqueue the task
    /// message on the stage's queue.
    pub async fn dispatch(&self, job_id: &str, stage: Stage, input: &Value) -> Result<()> {
        let payload_key = stage.input_key(job_id);
        self.blobs
            .put(&payload_key, input)
            .with_context(|| format!("storing input for stage '{stage}' of job {job_id}"))?;

        let task = StageTask::new(job_id, stage, payload_key);
        let mut attempt = 1;
        loop {
            match self.queue.send(stage.queue_name(), &task) {
                Ok(()) => break,
                Err(e) if attempt < SEND_ATTEMPTS => {
                    warn!(
                        job_id = %job_id,
                        stage = %stage,
                        attempt,
                        error = %e,
                        "queue send failed, retrying"
                    );
                    tokio::time::sleep(retry_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("enqueueing stage '{stage}' of job {job_id}")
                    });
                }
            }
        }

        debug!(job_id = %job_id, stage = %stage, "stage dispatched");
        Ok(())
    }
}
