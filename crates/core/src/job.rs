//! Job domain types.
//!
//! Structures shared between the state index, the controller, and the
//! status API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::{Stage, CANONICAL_ORDER};

/// User-supplied input for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brief {
    pub product: String,
    pub audience: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

impl Brief {
    /// Both intake paths validate identically: `product` and `audience`
    /// must be non-blank.
    pub fn validate(&self) -> Result<(), String> {
        if self.product.trim().is_empty() {
            return Err("brief is missing 'product'".to_string());
        }
        if self.audience.trim().is_empty() {
            return Err("brief is missing 'audience'".to_string());
        }
        Ok(())
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal jobs never change again (until reaping).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One end-to-end execution of the five-stage pipeline for one brief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub brief: Brief,
    pub status: JobStatus,
    /// Always a prefix of the canonical stage order.
    pub completed_stages: Vec<Stage>,
    /// Most recent stage whose task message was successfully enqueued.
    /// Dispatch-retry bookkeeping, not part of the API record: a stage may
    /// be appended to `completed_stages` while its successor's dispatch is
    /// still pending (crash or send failure between the two).
    #[serde(skip)]
    pub last_dispatched: Option<Stage>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: String, brief: Brief) -> Self {
        let now = Utc::now();
        Self {
            id,
            brief,
            status: JobStatus::Queued,
            completed_stages: Vec::new(),
            last_dispatched: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    /// The stage a completion event must name to advance this job.
    pub fn next_expected_stage(&self) -> Option<Stage> {
        CANONICAL_ORDER.get(self.completed_stages.len()).copied()
    }

    /// The stage whose task message still needs to be enqueued, if any.
    /// `None` while the pipeline is caught up (the next expected stage's
    /// dispatch already happened) or the job is terminal.
    pub fn pending_dispatch(&self) -> Option<Stage> {
        if self.status.is_terminal() {
            return None;
        }
        let next = self.next_expected_stage()?;
        if self.last_dispatched.map(|s| s.position()) >= Some(next.position()) {
            None
        } else {
            Some(next)
        }
    }

    /// Completion percentage for the task projection, 0-100.
    pub fn progress(&self) -> u8 {
        ((self.completed_stages.len() * 100 + CANONICAL_ORDER.len() / 2)
            / CANONICAL_ORDER.len()) as u8
    }
}

/// Result of applying a completion to the index.
#[derive(Debug, Clone, Copy)]
pub struct StageOutcome {
    /// A stage was newly appended to `completed_stages`.
    pub advanced: bool,
    /// The job reached `completed` or `failed` in this transition, or was
    /// already there.
    pub terminal: bool,
    /// Status snapshot taken inside the critical section.
    pub status: JobStatus,
    /// Stage whose task message still needs to be enqueued. Set on a fresh
    /// advance, and again on a redelivered duplicate whose earlier handling
    /// advanced the job but failed before the send - that redelivery is
    /// what retries the dispatch.
    pub pending_dispatch: Option<Stage>,
}

/// Counts by status for the aggregate endpoints.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobStats {
    pub total: usize,
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief() -> Brief {
        Brief {
            product: "Acme Widget".to_string(),
            audience: "Developers".to_string(),
            tone: Some("technical".to_string()),
        }
    }

    #[test]
    fn test_brief_validation() {
        assert!(brief().validate().is_ok());

        let missing_product = Brief {
            product: "  ".to_string(),
            ..brief()
        };
        assert!(missing_product.validate().is_err());

        let missing_audience = Brief {
            audience: String::new(),
            ..brief()
        };
        assert!(missing_audience.validate().is_err());
    }

    #[test]
    fn test_next_expected_stage_walks_canonical_order() {
        let mut job = Job::new("j1".to_string(), brief());
        for stage in CANONICAL_ORDER {
            assert_eq!(job.next_expected_stage(), Some(stage));
            job.completed_stages.push(stage);
        }
        assert_eq!(job.next_expected_stage(), None);
    }

    #[test]
    fn test_pending_dispatch_tracks_enqueue_progress() {
        let mut job = Job::new("j1".to_string(), brief());
        assert_eq!(job.pending_dispatch(), Some(Stage::Research));

        job.last_dispatched = Some(Stage::Research);
        assert_eq!(job.pending_dispatch(), None);

        // Research completed but product_manager never made it to the queue
        job.completed_stages.push(Stage::Research);
        assert_eq!(job.pending_dispatch(), Some(Stage::ProductManager));

        job.last_dispatched = Some(Stage::ProductManager);
        assert_eq!(job.pending_dispatch(), None);
    }

    #[test]
    fn test_progress_rounding() {
        let mut job = Job::new("j1".to_string(), brief());
        assert_eq!(job.progress(), 0);
        job.completed_stages.push(Stage::Research);
        assert_eq!(job.progress(), 20);
        job.completed_stages.push(Stage::ProductManager);
        job.completed_stages.push(Stage::Drawer);
        assert_eq!(job.progress(), 60);
    }
}
