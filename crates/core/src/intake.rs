//! # Submission Intake (asynchronous path)
//!
//! Consumes the submissions queue and funnels each message into the same
//! `admit` call the HTTP handler uses. Malformed submissions are logged and
//! deliberately NOT acknowledged - they cycle until an out-of-band
//! dead-letter policy picks them up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::controller::{AdmitError, PipelineController, SUBMISSIONS_QUEUE};
use crate::job::Brief;
use crate::messages::Submission;
use crate::metrics::Metrics;
use crate::store::{BlobStore, QueueClient, QueueMessage};

const RECEIVE_BATCH: usize = 10;
const RECEIVE_WAIT: Duration = Duration::from_secs(20);

#[derive(Debug, PartialEq, Eq)]
enum Disposition {
    Delete,
    /// Left on the queue for the dead-letter policy or redelivery.
    Keep,
}

/// Run the consumer until the shutdown signal flips.
pub async fn run_submission_intake(
    queue: QueueClient,
    blobs: BlobStore,
    controller: Arc<PipelineController>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("submission intake started");
    loop {
        let batch = tokio::select! {
            _ = shutdown.changed() => break,
            received = queue.receive(SUBMISSIONS_QUEUE, RECEIVE_BATCH, RECEIVE_WAIT) => {
                match received {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(error = %e, "submissions receive failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                }
            }
        };

        for message in batch {
            if *shutdown.borrow() {
                break;
            }
            let disposition = process_submission(&blobs, &controller, &metrics, &message).await;
            if disposition == Disposition::Delete {
                if let Err(e) = queue.delete(SUBMISSIONS_QUEUE, &message.receipt) {
                    error!(error = %e, "failed to acknowledge submission");
                }
            }
        }

        if *shutdown.borrow() {
            break;
        }
    }
    info!("submission intake stopped");
}

/// Handle one message from the submissions queue.
async fn process_submission(
    blobs: &BlobStore,
    controller: &PipelineController,
    metrics: &Metrics,
    message: &QueueMessage,
) -> Disposition {
    let submission: Submission = match serde_json::from_str(&message.body) {
        Ok(submission) => submission,
        Err(e) => {
            warn!(error = %e, body = %message.body, "malformed submission left for DLQ");
            Metrics::incr(&metrics.submissions_rejected);
            return Disposition::Keep;
        }
    };

    let (job_id, brief) = match submission {
        Submission::Inline { job_id, brief } => {
            (job_id.unwrap_or_else(|| Uuid::new_v4().to_string()), brief)
        }
        Submission::Stored {
            job_id,
            payload_key,
            ..
        } => {
            let value = match blobs.get(&payload_key) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        job_id = %job_id,
                        payload_key = %payload_key,
                        error = %e,
                        "stored brief unavailable, leaving submission for retry"
                    );
                    return Disposition::Keep;
                }
            };
            let brief: Brief = match serde_json::from_value(value) {
                Ok(brief) => brief,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "stored brief malformed, left for DLQ");
                    Metrics::incr(&metrics.submissions_rejected);
                    return Disposition::Keep;
                }
            };
            (job_id, brief)
        }
    };

    if let Err(reason) = brief.validate() {
        warn!(job_id = %job_id, reason = %reason, "invalid submission left for DLQ");
        Metrics::incr(&metrics.submissions_rejected);
        return Disposition::Keep;
    }

    match controller.admit(&job_id, brief).await {
        Ok(()) => {
            Metrics::incr(&metrics.submissions_accepted);
            info!(job_id = %job_id, "submission admitted");
            Disposition::Delete
        }
        // The job exists and its first dispatch already succeeded (stalled
        // admissions are resumed inside admit); redelivering this message
        // can never do more, so acknowledge it
        Err(AdmitError::Duplicate(id)) => {
            warn!(job_id = %id, "duplicate submission dropped");
            Disposition::Delete
        }
        Err(AdmitError::Dispatch(e)) => {
            error!(job_id = %job_id, error = %e, "admission dispatch failed, will retry");
            Disposition::Keep
        }
    }
}
