//! Scheduled collection runs: a daily refresh loop spawned at boot, sharing
//! the ingestor (and its in-flight guard) with on-demand /collect requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::task;
use tracing::info;

use crate::ingest::Ingestor;
use crate::models::ServiceKind;

pub fn spawn_collection_loop(ingestor: Arc<Ingestor>, interval_hours: u64) {
    let period = Duration::from_secs(interval_hours.max(1) * 60 * 60);
    task::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // First tick fires immediately so a fresh kernel has data to serve.
        loop {
            interval.tick().await;
            info!(target: "scheduler", "starting scheduled collection run");
            let outcome = ingestor.run_collection(&ServiceKind::ALL).await;
            info!(
                target: "scheduler",
                successful = outcome.successful.len(),
                failed = outcome.failed.len(),
                partial = outcome.partial,
                "scheduled collection run finished"
            );
        }
    });
}
