//! The download service: the operations behind the HTTP surface and CLI.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;

use mf_av::Muxer;
use mf_core::config::JobsConfig;
use mf_core::{guess_content_type, Container, DownloadKind, Error, JobId, RenditionDescriptor};
use mf_source::{with_extension, CatalogResolver, MediaCatalog, SourceRef, StreamSource};

use crate::artifact::RetrievedArtifact;
use crate::job::{DownloadJob, NewJob};
use crate::manager::JobManager;
use crate::mux::{MuxPipeline, MuxPlan};
use crate::relay::DirectRelay;

/// Result of probing a rendition.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub kind: DownloadKind,
    /// Allocated for mux renditions only.
    pub job_id: Option<JobId>,
    pub filename: String,
    pub content_type: String,
    pub rendition: RenditionDescriptor,
}

/// A direct download in progress.
pub struct DirectDownload {
    pub job_id: JobId,
    pub filename: String,
    pub content_type: String,
    pub total: Option<u64>,
    pub stream: BoxStream<'static, mf_core::Result<Bytes>>,
}

impl std::fmt::Debug for DirectDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectDownload")
            .field("job_id", &self.job_id)
            .field("filename", &self.filename)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Resolver, job manager, and both delivery paths behind one facade.
#[derive(Clone)]
pub struct DownloadService {
    resolver: CatalogResolver,
    manager: Arc<JobManager>,
    pipeline: MuxPipeline,
    relay: DirectRelay,
}

impl DownloadService {
    pub fn new(
        resolver: CatalogResolver,
        manager: Arc<JobManager>,
        pipeline: MuxPipeline,
        relay: DirectRelay,
    ) -> Self {
        Self {
            resolver,
            manager,
            pipeline,
            relay,
        }
    }

    /// Wire a service from a source, a muxer, and the jobs configuration.
    pub fn build(source: Arc<dyn StreamSource>, muxer: Arc<dyn Muxer>, config: &JobsConfig) -> Self {
        let manager = Arc::new(JobManager::new(config));
        let pipeline = MuxPipeline::new(
            Arc::clone(&source),
            muxer,
            config.work_dir(),
            config.artifact_dir(),
        );
        let relay = DirectRelay::new(Arc::clone(&source), config.execution_timeout());
        Self::new(CatalogResolver::new(source), manager, pipeline, relay)
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    pub fn source_name(&self) -> &'static str {
        self.resolver.source().name()
    }

    /// Resolve a URL into its rendition catalog.
    pub async fn catalog(&self, url: &str) -> mf_core::Result<MediaCatalog> {
        self.resolver.resolve(url).await
    }

    /// Classify a rendition and, for mux renditions, allocate a job.
    ///
    /// Direct renditions get no job here; their job is allocated when the
    /// stream is opened.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a bad URL, an unknown rendition, or a
    ///   video-only rendition without any audio to pair it with.
    /// - [`Error::Provider`] if metadata cannot be fetched.
    pub async fn probe(&self, url: &str, rendition_id: &str) -> mf_core::Result<ProbeOutcome> {
        let catalog = self.resolver.resolve(url).await?;
        let rendition = catalog.rendition(rendition_id)?.clone();
        let kind = DownloadKind::for_rendition(&rendition);

        if kind == DownloadKind::Direct {
            return Ok(ProbeOutcome {
                kind,
                job_id: None,
                filename: with_extension(&catalog.filename, &rendition.container),
                content_type: guess_content_type(&rendition.container, rendition.has_video)
                    .to_string(),
                rendition,
            });
        }

        let audio = catalog
            .select_companion_audio(&rendition)
            .cloned()
            .ok_or_else(|| {
                Error::Validation(format!(
                    "rendition {rendition_id} has no audio track and no audio rendition to pair with"
                ))
            })?;
        let container = Container::for_mux(&rendition.container, &audio.container);
        let filename = with_extension(&catalog.filename, container.extension());

        let job_id = self.manager.allocate(NewJob {
            source_url: catalog.source_url.clone(),
            rendition: rendition.clone(),
            audio_rendition: Some(audio),
            filename: filename.clone(),
            duration_seconds: catalog.duration_seconds,
        });

        Ok(ProbeOutcome {
            kind,
            job_id: Some(job_id),
            filename,
            content_type: container.content_type().to_string(),
            rendition,
        })
    }

    /// Start a probed mux job in the background.
    ///
    /// `url` and `rendition_id`, when given, must match what the job was
    /// probed with. Returns the job snapshot at the time of the call.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for an unknown job, a mismatched request, a
    /// direct job, or a job that is already running or finished.
    pub fn start(
        &self,
        job_id: JobId,
        url: Option<&str>,
        rendition_id: Option<&str>,
    ) -> mf_core::Result<DownloadJob> {
        let job = self
            .manager
            .snapshot(job_id)
            .map_err(|_| Error::Validation(format!("unknown download id {job_id}")))?;

        if job.kind != DownloadKind::Mux {
            return Err(Error::Validation(format!(
                "job {job_id} is a direct download and cannot be started"
            )));
        }
        if let Some(id) = rendition_id {
            if id != job.rendition.id {
                return Err(Error::Validation(format!(
                    "job {job_id} was probed for rendition {}, not {id}",
                    job.rendition.id
                )));
            }
        }
        if let Some(url) = url {
            if SourceRef::parse(url)?.canonical_url() != job.source_url {
                return Err(Error::Validation(format!(
                    "job {job_id} was probed for a different source"
                )));
            }
        }

        let plan = MuxPlan::from_job(&job)?;
        let pipeline = self.pipeline.clone();
        self.manager.execute(job_id, move |progress, cancel| async move {
            pipeline.run(plan, progress, cancel).await.map(Some)
        })?;

        tracing::info!(job_id = %job_id, rendition = %job.rendition.id, "Mux job started");
        self.manager.snapshot(job_id)
    }

    /// Open a direct download: allocate and claim a job, then relay.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the rendition needs muxing, plus anything
    /// [`probe`](Self::probe) or the provider can fail with.
    pub async fn stream_direct(
        &self,
        url: &str,
        rendition_id: &str,
    ) -> mf_core::Result<DirectDownload> {
        let catalog = self.resolver.resolve(url).await?;
        let rendition = catalog.rendition(rendition_id)?.clone();
        if DownloadKind::for_rendition(&rendition) == DownloadKind::Mux {
            return Err(Error::Validation(format!(
                "rendition {rendition_id} needs muxing; probe it first"
            )));
        }

        let filename = with_extension(&catalog.filename, &rendition.container);
        let content_type = guess_content_type(&rendition.container, rendition.has_video).to_string();
        let handle = self.manager.allocate_and_claim(NewJob {
            source_url: catalog.source_url.clone(),
            rendition: rendition.clone(),
            audio_rendition: None,
            filename: filename.clone(),
            duration_seconds: catalog.duration_seconds,
        })?;
        let job_id = handle.job_id();

        let relay = self.relay.open(handle, &catalog.source_url, &rendition.id).await?;
        Ok(DirectDownload {
            job_id,
            filename,
            content_type,
            total: relay.total,
            stream: relay.stream,
        })
    }

    /// Current snapshot of a job.
    pub fn progress(&self, job_id: JobId) -> mf_core::Result<DownloadJob> {
        self.manager.snapshot(job_id)
    }

    /// Open the artifact of a completed mux job.
    pub async fn retrieve(&self, job_id: JobId) -> mf_core::Result<RetrievedArtifact> {
        self.manager.retrieve(job_id).await
    }
}
