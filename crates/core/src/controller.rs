//! # Pipeline Controller
//!
//! The job state machine. Admission creates the record and dispatches the
//! first stage; each success event advances the job one stage along the
//! canonical order; the fifth completion finalizes the job and announces it
//! on the events queue. Every transition decision is taken by the index
//! inside its critical section, so a completion advances a job at most once
//! no matter how many times the event is delivered.
//!
//! Progress is committed before the dispatch I/O, so each job also records
//! the last stage whose task message actually reached its queue. When
//! handling dies between the two, the redelivered event (or retried
//! admission) sees the gap and repeats the dispatch instead of treating the
//! delivery as a spent duplicate.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::dispatch::StageDispatcher;
use crate::index::{IndexError, JobIndex};
use crate::job::{Brief, JobStatus};
use crate::messages::JobAnnouncement;
use crate::metrics::Metrics;
use crate::stage::{Stage, CANONICAL_ORDER};
use crate::store::{BlobError, BlobStore, QueueClient};

/// Name of the queue carrying completion events and job announcements.
pub const EVENTS_QUEUE: &str = "events";

/// Name of the queue carrying asynchronous submissions.
pub const SUBMISSIONS_QUEUE: &str = "submissions";

#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("job '{0}' already admitted")]
    Duplicate(String),
    #[error(transparent)]
    Dispatch(#[from] anyhow::Error),
}

pub struct PipelineController {
    index: Arc<JobIndex>,
    blobs: BlobStore,
    queue: QueueClient,
    dispatcher: StageDispatcher,
    metrics: Arc<Metrics>,
    /// Accept hyphen-form result keys on read (migration window).
    legacy_hyphen_keys: bool,
}

impl PipelineController {
    pub fn new(
        index: Arc<JobIndex>,
        blobs: BlobStore,
        queue: QueueClient,
        metrics: Arc<Metrics>,
        legacy_hyphen_keys: bool,
    ) -> Self {
        let dispatcher = StageDispatcher::new(blobs.clone(), queue.clone());
        Self {
            index,
            blobs,
            queue,
            dispatcher,
            metrics,
            legacy_hyphen_keys,
        }
    }

    /// Admit a job: create the record, mark it running, dispatch `research`.
    ///
    /// This is the single admission path for both intake funnels - all
    /// validation, duplicate detection, and first dispatch live here. A
    /// record left behind by an admission that failed before its research
    /// task reached the queue is resumed, not rejected as a duplicate;
    /// otherwise the retried submission would be the only thing able to
    /// repair the job and it would be dropped.
    pub async fn admit(&self, job_id: &str, brief: Brief) -> Result<(), AdmitError> {
        match self.index.create(job_id, brief) {
            Ok(()) => {}
            Err(IndexError::Duplicate(id)) => {
                if !self.index.admission_pending(&id) {
                    return Err(AdmitError::Duplicate(id));
                }
                self.index.start(&id);
                self.dispatch_stage(&id, Stage::Research).await?;
                Metrics::incr(&self.metrics.jobs_admitted);
                info!(job_id = %id, "stalled admission resumed");
                return Ok(());
            }
        }
        self.index.start(job_id);
        self.dispatch_stage(job_id, Stage::Research).await?;

        Metrics::incr(&self.metrics.jobs_admitted);
        info!(job_id = %job_id, "job admitted");
        Ok(())
    }

    /// Handle a successful stage completion. Returns `Ok` when the event is
    /// fully handled (including no-op dispositions: unknown job, duplicate,
    /// out-of-order, already terminal); errors mean the caller must leave
    /// the message on the queue for redelivery.
    pub async fn on_stage_complete(&self, job_id: &str, stage: Stage) -> Result<()> {
        let Some(outcome) = self.index.mark_stage_complete(job_id, stage, None) else {
            warn!(job_id = %job_id, stage = %stage, "completion for unknown job discarded");
            Metrics::incr(&self.metrics.events_ignored);
            return Ok(());
        };

        if outcome.terminal {
            if outcome.status == JobStatus::Completed && outcome.advanced {
                self.queue
                    .send(EVENTS_QUEUE, &JobAnnouncement::completed(job_id))
                    .context("announcing job completion")?;
                Metrics::incr(&self.metrics.jobs_completed);
                info!(job_id = %job_id, "job completed");
            }
            return Ok(());
        }

        // No pending dispatch means a spent duplicate or an out-of-order
        // event. With one pending, this delivery is either the fresh
        // advance or the redelivery that retries a dispatch which failed
        // after the advance was committed.
        let Some(next) = outcome.pending_dispatch else {
            Metrics::incr(&self.metrics.events_ignored);
            return Ok(());
        };

        self.dispatch_stage(job_id, next).await?;
        if outcome.advanced {
            info!(job_id = %job_id, stage = %next, "stage dispatched");
        } else {
            info!(job_id = %job_id, stage = %next, "stalled stage re-dispatched");
        }
        Ok(())
    }

    /// Build a stage's input, persist it, enqueue the task message, and
    /// record the dispatch. Safe to repeat: the blob overwrite is identical
    /// and workers tolerate duplicate task messages.
    async fn dispatch_stage(&self, job_id: &str, stage: Stage) -> Result<()> {
        let input = if stage == Stage::Research {
            let job = self
                .index
                .lookup(job_id)
                .context("job disappeared before research dispatch")?;
            json!({
                "product": job.brief.product,
                "audience": job.brief.audience,
                "tone": job.brief.tone,
                "instructions": Stage::Research.instructions(),
            })
        } else {
            let prev = CANONICAL_ORDER[stage.position() - 1];
            let upstream = self.fetch_result(job_id, prev)?;
            json!({
                "job_id": job_id,
                "upstream": upstream,
                "instructions": stage.instructions(),
            })
        };

        self.dispatcher.dispatch(job_id, stage, &input).await?;
        self.index.mark_dispatched(job_id, stage);
        Metrics::incr(&self.metrics.stages_dispatched);
        Ok(())
    }

    /// Handle a worker-reported stage failure: the job becomes terminal in
    /// one step and no later event mutates it.
    pub fn on_stage_failed(&self, job_id: &str, stage: Stage, error: &str) {
        match self.index.mark_stage_complete(job_id, stage, Some(error)) {
            Some(outcome) if outcome.status == JobStatus::Failed => {
                Metrics::incr(&self.metrics.jobs_failed);
                warn!(job_id = %job_id, stage = %stage, error = %error, "job failed");
            }
            Some(_) => {}
            None => {
                warn!(job_id = %job_id, stage = %stage, "failure for unknown job discarded");
                Metrics::incr(&self.metrics.events_ignored);
            }
        }
    }

    /// Fetch a stage's result artifact, falling back to the hyphen-form key
    /// older workers wrote when the migration flag is on.
    fn fetch_result(&self, job_id: &str, stage: Stage) -> Result<serde_json::Value> {
        let key = stage.result_key(job_id);
        match self.blobs.get(&key) {
            Ok(value) => Ok(value),
            Err(BlobError::NotFound(_)) if self.legacy_hyphen_keys => {
                let legacy = stage
                    .legacy_result_key(job_id)
                    .ok_or(BlobError::NotFound(key.clone()))
                    .with_context(|| format!("result artifact '{key}' missing"))?;
                self.blobs
                    .get(&legacy)
                    .with_context(|| format!("result artifact '{key}' missing (tried '{legacy}')"))
            }
            Err(e) => Err(e).with_context(|| format!("reading result artifact '{key}'")),
        }
    }
}
