//! In-memory job registry and execution.
//!
//! The [`JobManager`] owns every [`DownloadJob`]. Jobs are allocated first
//! (pure bookkeeping) and executed later, so a caller learns the id before
//! any work starts. Execution happens under a [`JobHandle`], an exclusive
//! lease: at most one path updates a given job, and a handle that goes away
//! without finishing its job fails it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use mf_core::config::JobsConfig;
use mf_core::{DownloadKind, Error, JobId};

use crate::artifact::{ArtifactPayload, ArtifactStore, RetrievedArtifact};
use crate::job::{DownloadJob, JobState, NewJob};

struct Entry {
    job: DownloadJob,
    leased: bool,
    cancel: CancellationToken,
    allocated_at: Instant,
}

/// Counts of jobs by state, for admin views.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub struct JobCounts {
    pub starting: usize,
    pub fetching: usize,
    pub muxing: usize,
    pub completed: usize,
    pub error: usize,
    pub artifacts: usize,
}

/// Registry of download jobs.
pub struct JobManager {
    jobs: RwLock<HashMap<JobId, Entry>>,
    artifacts: ArtifactStore,
    retention: Duration,
    execution_timeout: Duration,
}

impl JobManager {
    pub fn new(config: &JobsConfig) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            artifacts: ArtifactStore::new(config.artifact_policy),
            retention: config.retention(),
            execution_timeout: config.execution_timeout(),
        }
    }

    /// Wall-clock ceiling applied to every execution.
    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout
    }

    /// Create a `starting` job. No work is scheduled.
    pub fn allocate(&self, request: NewJob) -> JobId {
        let id = JobId::new();
        let job = DownloadJob::new(id, request);
        tracing::info!(
            job_id = %id,
            kind = %job.kind,
            rendition = %job.rendition.id,
            "Job allocated"
        );
        self.jobs.write().insert(
            id,
            Entry {
                job,
                leased: false,
                cancel: CancellationToken::new(),
                allocated_at: Instant::now(),
            },
        );
        id
    }

    /// Take the exclusive execution lease on a job.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the job does not exist, is already executing,
    /// or has finished. An id handed back for execution that names no job is
    /// caller misuse, unlike a lookup through [`snapshot`](Self::snapshot).
    pub fn claim(self: &Arc<Self>, job_id: JobId) -> mf_core::Result<JobHandle> {
        let mut jobs = self.jobs.write();
        let entry = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::Validation(format!("unknown job {job_id}")))?;

        if entry.job.state.is_terminal() {
            return Err(Error::Validation(format!(
                "job {job_id} already finished ({})",
                entry.job.state
            )));
        }
        if entry.leased {
            return Err(Error::Validation(format!("job {job_id} is already running")));
        }

        entry.leased = true;
        Ok(JobHandle {
            manager: Arc::clone(self),
            job_id,
            cancel: entry.cancel.clone(),
            finished: false,
        })
    }

    /// Allocate a job and claim it in one step.
    pub fn allocate_and_claim(self: &Arc<Self>, request: NewJob) -> mf_core::Result<JobHandle> {
        let id = self.allocate(request);
        self.claim(id)
    }

    /// Run `work` for a job in the background and return immediately.
    ///
    /// The job is claimed before anything is spawned, so an unknown, running,
    /// or finished job is rejected synchronously and `work` never runs twice.
    /// `work` receives a [`ProgressReporter`] and the job's cancellation
    /// token; its result completes or fails the job. Execution is bounded by
    /// the configured ceiling and stops if the retention sweep reclaims the
    /// job.
    pub fn execute<F, Fut>(self: &Arc<Self>, job_id: JobId, work: F) -> mf_core::Result<()>
    where
        F: FnOnce(ProgressReporter, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = mf_core::Result<Option<ArtifactPayload>>> + Send + 'static,
    {
        let handle = self.claim(job_id)?;
        let ceiling = self.execution_timeout;

        tokio::spawn(async move {
            let cancel = handle.cancellation();
            let work = work(handle.reporter(), cancel.child_token());

            let outcome = tokio::select! {
                res = tokio::time::timeout(ceiling, work) => match res {
                    Ok(res) => res,
                    Err(_) => Err(Error::ResourceExhausted(format!(
                        "execution exceeded {ceiling:?}"
                    ))),
                },
                _ = cancel.cancelled() => Err(Error::ResourceExhausted(
                    "job was reclaimed while running".into(),
                )),
            };

            match outcome {
                Ok(artifact) => handle.complete(artifact),
                Err(e) => handle.fail(&e),
            }
        });

        Ok(())
    }

    /// Current snapshot of a job.
    pub fn snapshot(&self, job_id: JobId) -> mf_core::Result<DownloadJob> {
        self.jobs
            .read()
            .get(&job_id)
            .map(|e| e.job.clone())
            .ok_or_else(|| Error::not_found("job", job_id))
    }

    /// Open the artifact of a completed job.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the job is unknown, not completed, or its
    /// artifact was consumed or reclaimed.
    pub async fn retrieve(&self, job_id: JobId) -> mf_core::Result<RetrievedArtifact> {
        let job = self.snapshot(job_id)?;
        if job.state != JobState::Completed || job.kind != DownloadKind::Mux {
            return Err(Error::not_found("artifact", job_id));
        }
        self.artifacts.retrieve(job_id).await
    }

    /// Remove jobs older than the retention window, with their artifacts.
    /// Running jobs that are reclaimed get cancelled. Returns the number of
    /// jobs removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let retention = self.retention;

        let reclaimed: Vec<(JobId, Entry)> = {
            let mut jobs = self.jobs.write();
            let expired: Vec<JobId> = jobs
                .iter()
                .filter(|(_, e)| now.saturating_duration_since(e.allocated_at) >= retention)
                .map(|(id, _)| *id)
                .collect();
            expired
                .into_iter()
                .filter_map(|id| jobs.remove(&id).map(|e| (id, e)))
                .collect()
        };

        for (id, entry) in &reclaimed {
            if !entry.job.state.is_terminal() {
                tracing::warn!(job_id = %id, state = %entry.job.state, "Reclaiming running job");
                entry.cancel.cancel();
            }
            self.artifacts.remove(*id);
        }

        if !reclaimed.is_empty() {
            tracing::info!(count = reclaimed.len(), "Retention sweep removed jobs");
        }
        reclaimed.len()
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<DownloadJob> {
        let mut jobs: Vec<DownloadJob> = self.jobs.read().values().map(|e| e.job.clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts {
            artifacts: self.artifacts.len(),
            ..JobCounts::default()
        };
        for entry in self.jobs.read().values() {
            match entry.job.state {
                JobState::Starting => counts.starting += 1,
                JobState::Fetching => counts.fetching += 1,
                JobState::Muxing => counts.muxing += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace a job record through `f`, if the job still exists and `f`
    /// yields a new record. Returns whether a replacement happened.
    fn replace(&self, job_id: JobId, f: impl FnOnce(&DownloadJob) -> Option<DownloadJob>) -> bool {
        let mut jobs = self.jobs.write();
        let Some(entry) = jobs.get_mut(&job_id) else {
            return false;
        };
        match f(&entry.job) {
            Some(next) => {
                if next.state.is_terminal() {
                    entry.leased = false;
                }
                entry.job = next;
                true
            }
            None => false,
        }
    }

    fn update_progress(&self, job_id: JobId, percentage: f64, state: JobState, stage: &str) {
        self.replace(job_id, |job| job.with_progress(percentage, state, stage));
    }

    fn complete(&self, job_id: JobId, artifact: Option<ArtifactPayload>) {
        let mut jobs = self.jobs.write();
        // A reclaimed job drops its payload here, which deletes the file.
        let Some(entry) = jobs.get_mut(&job_id) else {
            return;
        };
        let Some(next) = entry.job.completed() else {
            return;
        };
        if let Some(payload) = artifact {
            self.artifacts.insert(job_id, payload);
        }
        entry.job = next;
        entry.leased = false;
        tracing::info!(job_id = %job_id, "Job completed");
    }

    fn fail(&self, job_id: JobId, error: &Error) {
        let stage = match error {
            Error::Pipeline { step, .. } => Some(step.as_str()),
            _ => None,
        };
        if self.replace(job_id, |job| job.failed(&error.to_string(), stage)) {
            tracing::warn!(job_id = %job_id, "Job failed: {error}");
        }
    }
}

// ---------------------------------------------------------------------------
// JobHandle / ProgressReporter
// ---------------------------------------------------------------------------

/// Exclusive execution lease on a job.
///
/// Dropping a handle whose job has not reached a terminal state fails the
/// job as abandoned.
pub struct JobHandle {
    manager: Arc<JobManager>,
    job_id: JobId,
    cancel: CancellationToken,
    finished: bool,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Fires when the job is reclaimed by the retention sweep.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// A cloneable progress sink bound to this lease.
    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter {
            manager: Arc::clone(&self.manager),
            job_id: self.job_id,
        }
    }

    /// Report progress. Clamped, never decreasing, and capped below 100
    /// until completion. Ignored once the job is terminal.
    pub fn update_progress(&self, percentage: f64, state: JobState, stage: &str) {
        self.manager.update_progress(self.job_id, percentage, state, stage);
    }

    /// Mark the job completed, registering its artifact if any.
    pub fn complete(mut self, artifact: Option<ArtifactPayload>) {
        self.finished = true;
        self.manager.complete(self.job_id, artifact);
    }

    /// Mark the job failed.
    pub fn fail(mut self, error: &Error) {
        self.finished = true;
        self.manager.fail(self.job_id, error);
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.manager.fail(
                self.job_id,
                &Error::Internal("job was abandoned before finishing".into()),
            );
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Progress-only view of a lease, handed to job work.
#[derive(Clone)]
pub struct ProgressReporter {
    manager: Arc<JobManager>,
    job_id: JobId,
}

impl ProgressReporter {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// See [`JobHandle::update_progress`].
    pub fn update(&self, percentage: f64, state: JobState, stage: &str) {
        self.manager.update_progress(self.job_id, percentage, state, stage);
    }
}
