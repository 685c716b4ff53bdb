//! Lock-free orchestrator counters.
//!
//! Updated from every activity stream without taking the index lock;
//! exposed as a plain-text exposition on `GET /metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub jobs_admitted: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_reaped: AtomicU64,
    pub stages_dispatched: AtomicU64,
    pub events_processed: AtomicU64,
    pub events_ignored: AtomicU64,
    pub events_poison: AtomicU64,
    pub submissions_accepted: AtomicU64,
    pub submissions_rejected: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub jobs_admitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_reaped: u64,
    pub stages_dispatched: u64,
    pub events_processed: u64,
    pub events_ignored: u64,
    pub events_poison: u64,
    pub submissions_accepted: u64,
    pub submissions_rejected: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_admitted: self.jobs_admitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_reaped: self.jobs_reaped.load(Ordering::Relaxed),
            stages_dispatched: self.stages_dispatched.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
            events_poison: self.events_poison.load(Ordering::Relaxed),
            submissions_accepted: self.submissions_accepted.load(Ordering::Relaxed),
            submissions_rejected: self.submissions_rejected.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Render the counters as plain-text exposition lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in [
            ("pagesmith_jobs_admitted_total", self.jobs_admitted),
            ("pagesmith_jobs_completed_total", self.jobs_completed),
            ("pagesmith_jobs_failed_total", self.jobs_failed),
            ("pagesmith_jobs_reaped_total", self.jobs_reaped),
            ("pagesmith_stages_dispatched_total", self.stages_dispatched),
            ("pagesmith_events_processed_total", self.events_processed),
            ("pagesmith_events_ignored_total", self.events_ignored),
            ("pagesmith_events_poison_total", self.events_poison),
            (
                "pagesmith_submissions_accepted_total",
                self.submissions_accepted,
            ),
            (
                "pagesmith_submissions_rejected_total",
                self.submissions_rejected,
            ),
        ] {
            out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        Metrics::incr(&metrics.jobs_admitted);
        Metrics::incr(&metrics.jobs_admitted);
        Metrics::add(&metrics.events_processed, 3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_admitted, 2);
        assert_eq!(snapshot.events_processed, 3);
        assert_eq!(snapshot.jobs_failed, 0);
    }

    #[test]
    fn test_render_exposition() {
        let metrics = Metrics::new();
        Metrics::incr(&metrics.stages_dispatched);
        let text = metrics.snapshot().render();
        assert!(text.contains("pagesmith_stages_dispatched_total 1"));
        assert!(text.contains("# TYPE pagesmith_jobs_admitted_total counter"));
    }
}
