//! The download job record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mf_core::{DownloadKind, JobId, RenditionDescriptor};

/// Highest percentage a job may report before it completes.
pub const MAX_ACTIVE_PERCENTAGE: f64 = 99.0;

/// Lifecycle state of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Starting,
    Fetching,
    Muxing,
    Completed,
    Error,
}

impl JobState {
    /// Terminal states accept no further updates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Fetching => "fetching",
            Self::Muxing => "muxing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Stage labels reported alongside the state.
pub mod stage {
    pub const QUEUED: &str = "queued";
    pub const FETCH_VIDEO: &str = "fetch_video";
    pub const FETCH_AUDIO: &str = "fetch_audio";
    pub const MUX: &str = "mux";
    pub const FINALIZE: &str = "finalize";
    pub const RELAY: &str = "relay";
    pub const DONE: &str = "done";
}

/// One unit of download work and its observable progress.
///
/// Records are owned by the [`JobManager`](crate::JobManager); callers only
/// ever see clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: JobId,
    pub source_url: String,
    pub rendition: RenditionDescriptor,
    /// Audio track paired with a video-only rendition.
    pub audio_rendition: Option<RenditionDescriptor>,
    pub kind: DownloadKind,
    pub state: JobState,
    pub percentage: f64,
    pub stage: String,
    /// Download filename including extension.
    pub filename: String,
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Parameters for allocating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub source_url: String,
    pub rendition: RenditionDescriptor,
    pub audio_rendition: Option<RenditionDescriptor>,
    pub filename: String,
    pub duration_seconds: Option<f64>,
}

impl DownloadJob {
    pub(crate) fn new(id: JobId, request: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: DownloadKind::for_rendition(&request.rendition),
            source_url: request.source_url,
            rendition: request.rendition,
            audio_rendition: request.audio_rendition,
            state: JobState::Starting,
            percentage: 0.0,
            stage: stage::QUEUED.to_string(),
            filename: request.filename,
            duration_seconds: request.duration_seconds,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// The record after a progress report, or `None` if the report does not
    /// apply (terminal job, or a terminal target state).
    pub(crate) fn with_progress(&self, percentage: f64, state: JobState, stage: &str) -> Option<Self> {
        if self.state.is_terminal() || state.is_terminal() {
            return None;
        }
        let mut next = self.clone();
        let clamped = if percentage.is_finite() {
            percentage.clamp(0.0, MAX_ACTIVE_PERCENTAGE)
        } else {
            self.percentage
        };
        next.percentage = self.percentage.max(clamped);
        next.state = state;
        next.stage = stage.to_string();
        next.updated_at = Utc::now();
        Some(next)
    }

    pub(crate) fn completed(&self) -> Option<Self> {
        if self.state.is_terminal() {
            return None;
        }
        let mut next = self.clone();
        next.state = JobState::Completed;
        next.percentage = 100.0;
        next.stage = stage::DONE.to_string();
        next.updated_at = Utc::now();
        Some(next)
    }

    /// Moves to `error`. `stage` names the failing stage when known;
    /// otherwise the current stage label is kept.
    pub(crate) fn failed(&self, reason: &str, stage: Option<&str>) -> Option<Self> {
        if self.state.is_terminal() {
            return None;
        }
        let mut next = self.clone();
        next.state = JobState::Error;
        if let Some(stage) = stage {
            next.stage = stage.to_string();
        }
        next.error = Some(reason.to_string());
        next.updated_at = Utc::now();
        Some(next)
    }
}
