//! Shared application context.
//!
//! [`AppContext`] is cloned into every route handler via Axum state. All
//! fields are `Arc`s; the job registry lives inside the download service.

use std::sync::Arc;

use mf_av::{FfmpegMuxer, ToolRegistry};
use mf_core::config::Config;
use mf_jobs::{DownloadService, JobManager};
use mf_source::YtDlpSource;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub tools: Arc<ToolRegistry>,
    pub downloads: Arc<DownloadService>,
}

impl AppContext {
    pub fn new(config: Config, tools: Arc<ToolRegistry>, downloads: DownloadService) -> Self {
        Self {
            config: Arc::new(config),
            tools,
            downloads: Arc::new(downloads),
        }
    }

    /// Build the production context: yt-dlp as the stream source and ffmpeg
    /// as the muxer, both taken from `tools`.
    ///
    /// # Errors
    ///
    /// [`mf_core::Error::Tool`] if either tool is missing.
    pub fn production(config: Config, tools: Arc<ToolRegistry>) -> mf_core::Result<Self> {
        let source = Arc::new(YtDlpSource::from_registry(&tools, &config.source)?);
        let muxer = Arc::new(FfmpegMuxer::from_registry(&tools)?);
        let downloads = DownloadService::build(source, muxer, &config.jobs);
        Ok(Self::new(config, tools, downloads))
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        self.downloads.manager()
    }
}
