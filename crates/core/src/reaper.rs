//! # Reaper
//!
//! Periodic sweep over the job index: evicts terminal jobs past their TTL
//! and, when a stage deadline is configured, force-fails jobs whose worker
//! went silent. Artifacts in the blob store are never touched - retention
//! there is an external concern.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::index::JobIndex;
use crate::metrics::Metrics;

/// Run the reaper until the shutdown signal flips.
pub async fn run_reaper(
    index: Arc<JobIndex>,
    metrics: Arc<Metrics>,
    interval: Duration,
    ttl: Duration,
    stage_deadline: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), ttl_secs = ttl.as_secs(), "reaper started");
    let mut ticker = tokio::time::interval(interval);
    // The immediate first tick would sweep an empty index
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Some(deadline) = stage_deadline {
                    let stale = index.fail_stale(deadline);
                    if !stale.is_empty() {
                        warn!(count = stale.len(), jobs = ?stale, "stale jobs force-failed");
                        Metrics::add(&metrics.jobs_failed, stale.len() as u64);
                    }
                }
                let evicted = index.reap(ttl);
                if evicted > 0 {
                    info!(evicted, "terminal jobs reaped");
                    Metrics::add(&metrics.jobs_reaped, evicted as u64);
                }
            }
        }
    }
    info!("reaper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Brief;
    use crate::stage::CANONICAL_ORDER;

    fn brief() -> Brief {
        Brief {
            product: "Acme Widget".to_string(),
            audience: "Developers".to_string(),
            tone: None,
        }
    }

    #[tokio::test]
    async fn test_reaper_sweeps_on_tick() {
        let index = Arc::new(JobIndex::new());
        let metrics = Arc::new(Metrics::new());

        index.create("done", brief()).unwrap();
        index.start("done");
        for stage in CANONICAL_ORDER {
            index.mark_stage_complete("done", stage, None);
        }
        index.create("running", brief()).unwrap();
        index.start("running");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reaper = tokio::spawn(run_reaper(
            Arc::clone(&index),
            Arc::clone(&metrics),
            Duration::from_millis(20),
            Duration::ZERO,
            None,
            shutdown_rx,
        ));

        for _ in 0..50 {
            if index.lookup("done").is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(index.lookup("done").is_none());
        // An in-progress job is never evicted
        assert!(index.lookup("running").is_some());
        assert_eq!(metrics.snapshot().jobs_reaped, 1);

        shutdown_tx.send(true).unwrap();
        reaper.await.unwrap();
    }
}
