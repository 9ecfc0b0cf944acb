//! Finished mux outputs awaiting retrieval.
//!
//! Each record owns its file through a [`TempPath`], so the file is deleted
//! as soon as the last holder lets go: the store itself (retention sweep), or
//! an in-flight retrieval stream. With [`ArtifactPolicy::SingleUse`] the first
//! retrieval removes the record, making every later retrieval `NotFound`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tempfile::TempPath;
use tokio_util::io::ReaderStream;

use mf_core::config::ArtifactPolicy;
use mf_core::JobId;

/// A finished output handed to the store.
#[derive(Debug)]
pub struct ArtifactPayload {
    /// The file, deleted when dropped.
    pub path: TempPath,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
struct ArtifactRecord {
    file: Arc<TempPath>,
    filename: String,
    content_type: String,
    size: u64,
    created_at: DateTime<Utc>,
}

/// An opened artifact ready to be streamed.
pub struct RetrievedArtifact {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    file: tokio::fs::File,
    guard: Arc<TempPath>,
}

impl RetrievedArtifact {
    /// Stream the artifact bytes. The file stays on disk until the stream is
    /// dropped, even if the record was already consumed.
    pub fn into_stream(self) -> BoxStream<'static, std::io::Result<Bytes>> {
        let guard = self.guard;
        ReaderStream::new(self.file)
            .map(move |chunk| {
                let _held = &guard;
                chunk
            })
            .boxed()
    }
}

impl std::fmt::Debug for RetrievedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievedArtifact")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Artifact records keyed by job.
#[derive(Debug)]
pub struct ArtifactStore {
    records: Mutex<HashMap<JobId, ArtifactRecord>>,
    policy: ArtifactPolicy,
}

impl ArtifactStore {
    pub fn new(policy: ArtifactPolicy) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> ArtifactPolicy {
        self.policy
    }

    /// Register the artifact of a completed job, replacing any previous one.
    pub fn insert(&self, job_id: JobId, payload: ArtifactPayload) {
        tracing::debug!(
            job_id = %job_id,
            path = %payload.path.display(),
            size = payload.size,
            "Artifact registered"
        );
        let record = ArtifactRecord {
            file: Arc::new(payload.path),
            filename: payload.filename,
            content_type: payload.content_type,
            size: payload.size,
            created_at: Utc::now(),
        };
        self.records.lock().insert(job_id, record);
    }

    /// Open the artifact of `job_id` for streaming.
    ///
    /// # Errors
    ///
    /// Returns [`mf_core::Error::NotFound`] if no artifact is registered, or
    /// it was already consumed or reclaimed.
    pub async fn retrieve(&self, job_id: JobId) -> mf_core::Result<RetrievedArtifact> {
        let record = {
            let mut records = self.records.lock();
            match self.policy {
                ArtifactPolicy::SingleUse => records.remove(&job_id),
                ArtifactPolicy::Ttl => records.get(&job_id).cloned(),
            }
        }
        .ok_or_else(|| mf_core::Error::not_found("artifact", job_id))?;

        let file = tokio::fs::File::open(&*record.file).await.map_err(|e| {
            tracing::warn!(job_id = %job_id, "Artifact file unreadable: {e}");
            mf_core::Error::not_found("artifact", job_id)
        })?;

        tracing::info!(job_id = %job_id, filename = %record.filename, "Artifact retrieved");
        Ok(RetrievedArtifact {
            filename: record.filename,
            content_type: record.content_type,
            size: record.size,
            created_at: record.created_at,
            file,
            guard: record.file,
        })
    }

    /// Drop the record of `job_id`. Returns whether one existed.
    pub fn remove(&self, job_id: JobId) -> bool {
        self.records.lock().remove(&job_id).is_some()
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.records.lock().contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
