//! The mux pipeline: fetch video, fetch audio, mux, register the artifact.
//!
//! Stage weighting of the job percentage:
//!
//! | stage         | state      | range    |
//! |---------------|------------|----------|
//! | `fetch_video` | `fetching` | 0 - 40   |
//! | `fetch_audio` | `fetching` | 40 - 70  |
//! | `mux`         | `muxing`   | 70 - 99  |
//! | `finalize`    | `muxing`   | 99       |
//!
//! Completion (100) is set by the job manager once the artifact is
//! registered. All intermediate files live in a per-job [`Workspace`] that is
//! removed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use mf_av::{validate_output, MuxRequest, Muxer, Workspace};
use mf_core::{Container, Error, JobId, RenditionDescriptor};
use mf_source::StreamSource;

use crate::artifact::ArtifactPayload;
use crate::job::{stage, DownloadJob, JobState};
use crate::manager::ProgressReporter;
use crate::progress::{within_band, TransferProgress};

const VIDEO_BAND: (f64, f64) = (0.0, 40.0);
const AUDIO_BAND: (f64, f64) = (40.0, 70.0);
const MUX_BAND: (f64, f64) = (70.0, 99.0);

/// What a mux job needs, taken from its job record.
#[derive(Debug, Clone)]
pub struct MuxPlan {
    pub job_id: JobId,
    pub source_url: String,
    pub video: RenditionDescriptor,
    pub audio: RenditionDescriptor,
    pub container: Container,
    pub filename: String,
    pub duration_seconds: Option<f64>,
}

impl MuxPlan {
    /// Build a plan from a mux job record.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the job has no companion audio rendition.
    pub fn from_job(job: &DownloadJob) -> mf_core::Result<Self> {
        let audio = job.audio_rendition.clone().ok_or_else(|| {
            Error::Validation(format!("job {} has no audio rendition to mux with", job.id))
        })?;
        Ok(Self {
            job_id: job.id,
            source_url: job.source_url.clone(),
            container: Container::for_mux(&job.rendition.container, &audio.container),
            video: job.rendition.clone(),
            audio,
            filename: job.filename.clone(),
            duration_seconds: job.duration_seconds,
        })
    }
}

/// Runs mux plans.
#[derive(Clone)]
pub struct MuxPipeline {
    source: Arc<dyn StreamSource>,
    muxer: Arc<dyn Muxer>,
    work_dir: PathBuf,
    artifact_dir: PathBuf,
}

impl MuxPipeline {
    pub fn new(
        source: Arc<dyn StreamSource>,
        muxer: Arc<dyn Muxer>,
        work_dir: PathBuf,
        artifact_dir: PathBuf,
    ) -> Self {
        Self {
            source,
            muxer,
            work_dir,
            artifact_dir,
        }
    }

    /// Execute `plan`, reporting progress through `progress`.
    ///
    /// Every failure is a [`Error::Pipeline`] naming the failing stage, except
    /// ceiling errors which pass through unchanged.
    pub async fn run(
        &self,
        plan: MuxPlan,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> mf_core::Result<ArtifactPayload> {
        let job_id = plan.job_id;
        let workspace = Workspace::new(&self.work_dir, &format!("job-{job_id}"))
            .map_err(|e| e.at_stage(stage::FETCH_VIDEO))?;

        let video_path = workspace.temp_file(&format!("video.{}", plan.video.container));
        let audio_path = workspace.temp_file(&format!("audio.{}", plan.audio.container));
        let output_path = workspace.temp_file(&format!("output.{}", plan.container.extension()));

        progress.update(VIDEO_BAND.0, JobState::Fetching, stage::FETCH_VIDEO);
        let video_bytes = self
            .fetch(&plan.source_url, &plan.video.id, &video_path, &progress, VIDEO_BAND, stage::FETCH_VIDEO)
            .await
            .map_err(|e| e.at_stage(stage::FETCH_VIDEO))?;
        tracing::debug!(job_id = %job_id, bytes = video_bytes, "Video track fetched");

        progress.update(AUDIO_BAND.0, JobState::Fetching, stage::FETCH_AUDIO);
        let audio_bytes = self
            .fetch(&plan.source_url, &plan.audio.id, &audio_path, &progress, AUDIO_BAND, stage::FETCH_AUDIO)
            .await
            .map_err(|e| e.at_stage(stage::FETCH_AUDIO))?;
        tracing::debug!(job_id = %job_id, bytes = audio_bytes, "Audio track fetched");

        progress.update(MUX_BAND.0, JobState::Muxing, stage::MUX);
        let request = MuxRequest {
            video: video_path,
            audio: audio_path,
            output: output_path.clone(),
            container: plan.container,
            duration_secs: plan.duration_seconds,
        };
        let on_mux_progress = |fraction: f64| {
            progress.update(
                within_band(MUX_BAND.0, MUX_BAND.1, fraction),
                JobState::Muxing,
                stage::MUX,
            );
        };
        self.muxer
            .mux(&request, &on_mux_progress, cancel)
            .await
            .map_err(|e| e.at_stage(stage::MUX))?;
        let size = validate_output(&output_path, plan.container)
            .await
            .map_err(|e| e.at_stage(stage::MUX))?;

        progress.update(MUX_BAND.1, JobState::Muxing, stage::FINALIZE);
        let dest = self
            .artifact_dir
            .join(format!("{job_id}.{}", plan.container.extension()));
        let final_path = workspace
            .finalize(&output_path, &dest)
            .map_err(|e| e.at_stage(stage::FINALIZE))?;

        tracing::info!(job_id = %job_id, size, container = %plan.container, "Mux finished");
        Ok(ArtifactPayload {
            path: TempPath::from_path(final_path),
            filename: plan.filename,
            content_type: plan.container.content_type().to_string(),
            size,
        })
    }

    /// Stream one rendition into `dest`, mapping its progress into `band`.
    async fn fetch(
        &self,
        source_url: &str,
        rendition_id: &str,
        dest: &Path,
        progress: &ProgressReporter,
        band: (f64, f64),
        stage_label: &str,
    ) -> mf_core::Result<u64> {
        let mut stream = self.source.open_stream(source_url, rendition_id).await?;
        let mut transfer = TransferProgress::new(stream.total);
        let mut file = tokio::fs::File::create(dest).await?;

        while let Some(chunk) = stream.chunks.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            transfer.advance(chunk.len());
            progress.update(
                within_band(band.0, band.1, transfer.fraction()),
                JobState::Fetching,
                stage_label,
            );
        }
        file.flush().await?;

        if transfer.transferred() == 0 {
            return Err(Error::Provider(format!(
                "rendition {rendition_id} produced no bytes"
            )));
        }
        if let Some(total) = transfer.total() {
            if transfer.transferred() < total {
                return Err(Error::Provider(format!(
                    "rendition {rendition_id} ended after {} of {total} bytes",
                    transfer.transferred()
                )));
            }
        }
        Ok(transfer.transferred())
    }
}
