//! # Job State Index
//!
//! In-memory map from job id to job record, shared by every activity stream
//! in the orchestrator. All transition decisions happen inside one critical
//! section so the controller's subsequent dispatch is based on a consistent
//! snapshot of the job.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::job::{Brief, Job, JobStats, JobStatus, StageOutcome};
use crate::stage::{Stage, CANONICAL_ORDER};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("job '{0}' already admitted")]
    Duplicate(String),
}

/// The only shared mutable state in the orchestrator.
#[derive(Default)]
pub struct JobIndex {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh `queued` record. Duplicate admission is rejected here,
    /// which is what makes the two intake paths safe to race.
    pub fn create(&self, id: &str, brief: Brief) -> Result<(), IndexError> {
        let mut jobs = self.jobs.lock().expect("job index poisoned");
        if jobs.contains_key(id) {
            return Err(IndexError::Duplicate(id.to_string()));
        }
        jobs.insert(id.to_string(), Job::new(id.to_string(), brief));
        Ok(())
    }

    /// `queued -> in_progress`. Idempotent if already in progress.
    pub fn start(&self, id: &str) {
        let mut jobs = self.jobs.lock().expect("job index poisoned");
        if let Some(job) = jobs.get_mut(id) {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::InProgress;
                job.updated_at = Utc::now();
            }
        }
    }

    /// Apply a stage completion (or failure, when `error` is set).
    ///
    /// Returns `None` for unknown jobs; the caller logs and discards the
    /// event. Already-terminal jobs silently reject everything. Duplicates
    /// and out-of-order completions never advance state.
    pub fn mark_stage_complete(
        &self,
        id: &str,
        stage: Stage,
        error: Option<&str>,
    ) -> Option<StageOutcome> {
        let mut jobs = self.jobs.lock().expect("job index poisoned");
        let job = jobs.get_mut(id)?;

        if job.status.is_terminal() {
            debug!(job_id = %id, stage = %stage, "event for terminal job discarded");
            return Some(StageOutcome {
                advanced: false,
                terminal: true,
                status: job.status,
                pending_dispatch: None,
            });
        }

        let now = Utc::now();

        if let Some(error) = error {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.completed_at = Some(now);
            job.updated_at = now;
            return Some(StageOutcome {
                advanced: false,
                terminal: true,
                status: JobStatus::Failed,
                pending_dispatch: None,
            });
        }

        if job.completed_stages.contains(&stage) {
            debug!(job_id = %id, stage = %stage, "duplicate completion ignored");
            return Some(StageOutcome {
                advanced: false,
                terminal: false,
                status: job.status,
                pending_dispatch: job.pending_dispatch(),
            });
        }

        // Prefix rule: only the next expected stage may advance the job.
        // Anything else is an out-of-order event from a misbehaving worker.
        if job.next_expected_stage() != Some(stage) {
            warn!(
                job_id = %id,
                stage = %stage,
                expected = ?job.next_expected_stage(),
                "out-of-order completion ignored"
            );
            return Some(StageOutcome {
                advanced: false,
                terminal: false,
                status: job.status,
                pending_dispatch: job.pending_dispatch(),
            });
        }

        job.completed_stages.push(stage);
        job.updated_at = now;

        let terminal = job.completed_stages.len() == CANONICAL_ORDER.len();
        if terminal {
            job.status = JobStatus::Completed;
            job.completed_at = Some(now);
        }
        Some(StageOutcome {
            advanced: true,
            terminal,
            status: job.status,
            pending_dispatch: job.pending_dispatch(),
        })
    }

    /// Record that `stage`'s task message reached its queue. Called only
    /// after a successful send, so a crash in between leaves the dispatch
    /// visibly pending. Never moves backwards.
    pub fn mark_dispatched(&self, id: &str, stage: Stage) {
        let mut jobs = self.jobs.lock().expect("job index poisoned");
        if let Some(job) = jobs.get_mut(id) {
            if job.last_dispatched.map(|s| s.position()) < Some(stage.position()) {
                job.last_dispatched = Some(stage);
                job.updated_at = Utc::now();
            }
        }
    }

    /// Whether a job's record exists but its research task was never
    /// enqueued - an admission that crashed or failed between `create` and
    /// the first dispatch. Such a record may be resumed, not treated as a
    /// duplicate.
    pub fn admission_pending(&self, id: &str) -> bool {
        let jobs = self.jobs.lock().expect("job index poisoned");
        jobs.get(id)
            .map(|job| !job.status.is_terminal() && job.last_dispatched.is_none())
            .unwrap_or(false)
    }

    pub fn lookup(&self, id: &str) -> Option<Job> {
        self.jobs.lock().expect("job index poisoned").get(id).cloned()
    }

    pub fn stats(&self) -> JobStats {
        let jobs = self.jobs.lock().expect("job index poisoned");
        let mut stats = JobStats {
            total: jobs.len(),
            ..JobStats::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::InProgress => stats.in_progress += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Snapshot of every record, for the task-projection endpoint.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .expect("job index poisoned")
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        jobs
    }

    /// Evict terminal jobs whose `completed_at` is older than `max_age`.
    /// Non-terminal jobs are never evicted. Returns the eviction count.
    pub fn reap(&self, max_age: Duration) -> usize {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let mut jobs = self.jobs.lock().expect("job index poisoned");
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal()
                && job.completed_at.map(|t| t < cutoff).unwrap_or(false))
        });
        before - jobs.len()
    }

    /// Force-fail `in_progress` jobs not updated within `deadline`. Only
    /// runs when a stage deadline is configured; returns the ids failed.
    pub fn fail_stale(&self, deadline: Duration) -> Vec<String> {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(deadline).unwrap_or_else(|_| chrono::Duration::zero());
        let mut jobs = self.jobs.lock().expect("job index poisoned");
        let mut failed = Vec::new();
        for job in jobs.values_mut() {
            if job.status == JobStatus::InProgress && job.updated_at < cutoff {
                let now = Utc::now();
                job.status = JobStatus::Failed;
                job.error = Some("stage deadline exceeded".to_string());
                job.completed_at = Some(now);
                job.updated_at = now;
                failed.push(job.id.clone());
            }
        }
        failed
    }
}
