//! Background retention sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::manager::JobManager;

/// Periodically reclaim expired jobs and their artifacts.
///
/// Runs until the cancellation token is triggered.
pub async fn run_retention_sweeper(
    manager: Arc<JobManager>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = interval.as_secs(), "Retention sweeper started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => { break; }
        }

        let removed = manager.sweep();
        if removed > 0 {
            tracing::debug!(removed, remaining = manager.len(), "Sweep pass finished");
        }
    }

    tracing::info!("Retention sweeper stopped");
}
