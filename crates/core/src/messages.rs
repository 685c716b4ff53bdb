//! Wire message types.
//!
//! Field names here are load-bearing: existing stage workers produce and
//! consume these exact shapes. Legacy producers send the stage under `task`
//! instead of `task_type`, and `result_key` is frequently absent - the next
//! stage's input key is always derived from the deterministic key scheme,
//! never from the event payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::Brief;
use crate::stage::Stage;

/// Orchestrator -> worker, on the stage's queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTask {
    pub job_id: String,
    pub task_type: Stage,
    pub payload_key: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl StageTask {
    pub fn new(job_id: &str, stage: Stage, payload_key: String) -> Self {
        Self {
            job_id: job_id.to_string(),
            task_type: stage,
            payload_key,
            timestamp: Utc::now(),
            source: "orchestrator".to_string(),
        }
    }
}

/// Worker-reported outcome of a stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    Failure,
    Error,
    /// Informational heartbeat; never changes job state.
    InProgress,
}

/// Worker -> orchestrator, on the events queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub job_id: String,
    #[serde(alias = "task")]
    pub task_type: Stage,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Orchestrator announcement that a job finished, published on the same
/// events queue the workers report on. Distinguished from a
/// [`CompletionEvent`] by the absence of `task_type`/`task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAnnouncement {
    pub job_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}

impl JobAnnouncement {
    pub fn completed(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            event_type: "job_completed".to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Anything that may appear on the events queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventsQueueMessage {
    Completion(CompletionEvent),
    Announcement(JobAnnouncement),
}

/// A message on the submissions queue: either a pointer to a brief stored
/// in the blob store, or the brief inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Submission {
    Stored {
        job_id: String,
        task_type: String,
        payload_key: String,
    },
    Inline {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        #[serde(flatten)]
        brief: Brief,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_event_accepts_legacy_task_key() {
        let current: CompletionEvent = serde_json::from_str(
            r#"{"job_id":"j1","task_type":"research","status":"success"}"#,
        )
        .unwrap();
        assert_eq!(current.task_type, Stage::Research);

        let legacy: CompletionEvent = serde_json::from_str(
            r#"{"job_id":"j1","task":"product-manager","status":"success"}"#,
        )
        .unwrap();
        assert_eq!(legacy.task_type, Stage::ProductManager);
        assert!(legacy.result_key.is_none());
    }

    #[test]
    fn test_events_queue_message_discriminates_on_task_type() {
        let completion: EventsQueueMessage = serde_json::from_str(
            r#"{"job_id":"j1","task_type":"coder","status":"success","result_key":"j1/coder-result.json"}"#,
        )
        .unwrap();
        assert!(matches!(completion, EventsQueueMessage::Completion(_)));

        let announcement: EventsQueueMessage = serde_json::from_str(
            r#"{"job_id":"j1","event_type":"job_completed","timestamp":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        match announcement {
            EventsQueueMessage::Announcement(a) => {
                assert_eq!(a.event_type, "job_completed");
            }
            other => panic!("expected announcement, got {other:?}"),
        }
    }

    #[test]
    fn test_submission_variants() {
        let stored: Submission = serde_json::from_str(
            r#"{"job_id":"j1","task_type":"start_job","payload_key":"j1/brief.json"}"#,
        )
        .unwrap();
        assert!(matches!(stored, Submission::Stored { .. }));

        let inline: Submission = serde_json::from_str(
            r#"{"product":"Acme Widget","audience":"Developers","tone":"technical"}"#,
        )
        .unwrap();
        match inline {
            Submission::Inline { job_id, brief } => {
                assert!(job_id.is_none());
                assert_eq!(brief.product, "Acme Widget");
                assert_eq!(brief.tone.as_deref(), Some("technical"));
            }
            other => panic!("expected inline brief, got {other:?}"),
        }
    }

    #[test]
    fn test_stage_task_shape() {
        let task = StageTask::new("j1", Stage::Drawer, "j1/drawer.json".to_string());
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["task_type"], "drawer");
        assert_eq!(json["payload_key"], "j1/drawer.json");
        assert_eq!(json["source"], "orchestrator");
    }
}
