//! # Events Consumer
//!
//! Long-polls the events queue and feeds completions to the controller.
//! A message is deleted only once it is fully handled; anything that errors
//! stays claimed and is redelivered after the visibility timeout, which is
//! the whole crash-recovery story.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::controller::{PipelineController, EVENTS_QUEUE};
use crate::messages::{EventStatus, EventsQueueMessage};
use crate::metrics::Metrics;
use crate::store::{QueueClient, QueueMessage};

const RECEIVE_BATCH: usize = 10;
const RECEIVE_WAIT: Duration = Duration::from_secs(20);

/// What to do with a message after processing.
#[derive(Debug, PartialEq, Eq)]
enum Disposition {
    /// Handled (or deliberately discarded): acknowledge it.
    Delete,
    /// Handling failed transiently: leave it claimed for redelivery.
    Retry,
}

/// Run the consumer until the shutdown signal flips.
pub async fn run_events_consumer(
    queue: QueueClient,
    controller: Arc<PipelineController>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("events consumer started");
    loop {
        let batch = tokio::select! {
            _ = shutdown.changed() => break,
            received = queue.receive(EVENTS_QUEUE, RECEIVE_BATCH, RECEIVE_WAIT) => {
                match received {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(error = %e, "events receive failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                }
            }
        };

        for message in batch {
            if *shutdown.borrow() {
                // Leave the rest claimed; they redeliver after restart
                break;
            }
            let disposition = process_message(&controller, &metrics, &message).await;
            if disposition == Disposition::Delete {
                if let Err(e) = queue.delete(EVENTS_QUEUE, &message.receipt) {
                    error!(error = %e, "failed to acknowledge event");
                }
            }
        }

        if *shutdown.borrow() {
            break;
        }
    }
    info!("events consumer stopped");
}

/// Handle one message from the events queue.
async fn process_message(
    controller: &PipelineController,
    metrics: &Metrics,
    message: &QueueMessage,
) -> Disposition {
    let parsed: EventsQueueMessage = match serde_json::from_str(&message.body) {
        Ok(parsed) => parsed,
        Err(e) => {
            // Poison messages never block progress
            warn!(error = %e, body = %message.body, "unparseable event dropped");
            Metrics::incr(&metrics.events_poison);
            return Disposition::Delete;
        }
    };

    let event = match parsed {
        EventsQueueMessage::Announcement(_) => {
            // Our own job-done announcement echoed back; not ours to handle
            Metrics::incr(&metrics.events_ignored);
            return Disposition::Delete;
        }
        EventsQueueMessage::Completion(event) => event,
    };

    match event.status {
        EventStatus::InProgress => Disposition::Delete,
        EventStatus::Success => {
            match controller
                .on_stage_complete(&event.job_id, event.task_type)
                .await
            {
                Ok(()) => {
                    Metrics::incr(&metrics.events_processed);
                    Disposition::Delete
                }
                Err(e) => {
                    error!(
                        job_id = %event.job_id,
                        stage = %event.task_type,
                        error = %e,
                        "completion handling failed, leaving for redelivery"
                    );
                    Disposition::Retry
                }
            }
        }
        EventStatus::Failure | EventStatus::Error => {
            let reason = event.error.as_deref().unwrap_or("stage failed");
            controller.on_stage_failed(&event.job_id, event.task_type, reason);
            Metrics::incr(&metrics.events_processed);
            Disposition::Delete
        }
    }
}
