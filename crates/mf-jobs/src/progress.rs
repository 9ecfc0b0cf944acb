//! Progress estimation and polling.
//!
//! [`TransferProgress`] turns a byte count into a completion fraction;
//! [`ProgressPoller`] is the bounded, cancellable periodic check a client uses
//! to follow a job until it finishes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use mf_core::JobId;

use crate::job::DownloadJob;
use crate::manager::JobManager;

/// Time constant of the elapsed-time curve used when the total is unknown.
const UNKNOWN_TOTAL_TAU_SECS: f64 = 30.0;

/// Ceiling of the elapsed-time curve. The curve approaches it but never
/// gets there.
const UNKNOWN_TOTAL_CEILING: f64 = 0.99;

/// Byte-transfer progress for one stream.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    total: Option<u64>,
    transferred: u64,
    started: Instant,
}

impl TransferProgress {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            transferred: 0,
            started: Instant::now(),
        }
    }

    pub fn advance(&mut self, bytes: usize) {
        self.transferred = self.transferred.saturating_add(bytes as u64);
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Completion in `0.0..=1.0`.
    ///
    /// Bytes over the declared total when known, otherwise a curve over
    /// elapsed time that stays below `0.99`.
    pub fn fraction(&self) -> f64 {
        match self.total {
            Some(total) => (self.transferred as f64 / total as f64).clamp(0.0, 1.0),
            None => elapsed_curve(self.started.elapsed()),
        }
    }
}

fn elapsed_curve(elapsed: Duration) -> f64 {
    let x = elapsed.as_secs_f64() / UNKNOWN_TOTAL_TAU_SECS;
    UNKNOWN_TOTAL_CEILING * (1.0 - (-x).exp())
}

/// Map a stage-local fraction into the stage's share of the job percentage.
pub fn within_band(start: f64, end: f64, fraction: f64) -> f64 {
    start + (end - start) * fraction.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// ProgressPoller
// ---------------------------------------------------------------------------

/// Periodic snapshot reader for one job.
///
/// Each call to [`next`](Self::next) waits for the next tick and yields the
/// current snapshot. The poller stops (returns `None`) after yielding a
/// terminal snapshot, after reporting that the job is gone, after the maximum
/// wait has elapsed, or once `cancel` fires.
pub struct ProgressPoller {
    manager: Arc<JobManager>,
    job_id: JobId,
    interval: Interval,
    deadline: Instant,
    max_wait: Duration,
    cancel: CancellationToken,
    finished: bool,
}

impl ProgressPoller {
    pub fn new(
        manager: Arc<JobManager>,
        job_id: JobId,
        poll_interval: Duration,
        max_wait: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            manager,
            job_id,
            interval,
            deadline: Instant::now() + max_wait,
            max_wait,
            cancel,
            finished: false,
        }
    }

    /// The next snapshot, an error that ended polling, or `None` once done.
    pub async fn next(&mut self) -> Option<mf_core::Result<DownloadJob>> {
        if self.finished {
            return None;
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.finished = true;
                return None;
            }
            _ = tokio::time::sleep_until(self.deadline) => {
                self.finished = true;
                return Some(Err(mf_core::Error::ResourceExhausted(format!(
                    "job {} still running after {:?}",
                    self.job_id, self.max_wait
                ))));
            }
            _ = self.interval.tick() => {}
        }

        match self.manager.snapshot(self.job_id) {
            Ok(job) => {
                if job.state.is_terminal() {
                    self.finished = true;
                }
                Some(Ok(job))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    /// Poll until the job finishes, calling `on_snapshot` for every
    /// snapshot. Returns the terminal snapshot.
    pub async fn wait(mut self, mut on_snapshot: impl FnMut(&DownloadJob)) -> mf_core::Result<DownloadJob> {
        let mut last = None;
        while let Some(next) = self.next().await {
            let job = next?;
            on_snapshot(&job);
            last = Some(job);
        }
        match last {
            Some(job) if job.state.is_terminal() => Ok(job),
            _ => Err(mf_core::Error::Internal(format!(
                "polling of job {} was cancelled",
                self.job_id
            ))),
        }
    }
}
