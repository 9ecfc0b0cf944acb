//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] over an
//! in-memory [`FakeSource`] and a [`FakeMuxer`], with job scratch space and
//! artifacts in a temporary directory. The [`TestHarness::with_server`]
//! constructor starts Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use mf_av::{MuxProgressFn, MuxRequest, Muxer, ToolRegistry};
use mf_core::config::Config;
use mf_core::{Error, RenditionDescriptor};
use mf_jobs::{DownloadJob, DownloadService};
use mf_server::context::AppContext;
use mf_server::router::build_router;
use mf_source::{ByteStream, SourceMetadata, StreamSource};

pub const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
pub const TITLE: &str = "Never Gonna Give You Up (Official Video)";

/// Bytes the fake provider serves for a rendition.
pub fn body_for(id: &str) -> Vec<u8> {
    format!("<{id}>")
        .into_bytes()
        .into_iter()
        .cycle()
        .take(4096)
        .collect()
}

fn rendition(
    id: &str,
    container: &str,
    quality: &str,
    has_audio: bool,
    has_video: bool,
) -> RenditionDescriptor {
    RenditionDescriptor {
        id: id.into(),
        container: container.into(),
        quality: quality.into(),
        quality_label: has_video.then(|| quality.to_string()),
        has_audio,
        has_video,
        audio_codec: has_audio.then(|| "mp4a.40.2".to_string()),
        video_codec: has_video.then(|| "avc1.640028".to_string()),
        filesize: Some(4096),
        audio_bitrate: has_audio.then_some(128.0),
    }
}

// ---------------------------------------------------------------------------
// FakeSource
// ---------------------------------------------------------------------------

/// In-memory provider with a fixed catalog.
pub struct FakeSource {
    renditions: Vec<RenditionDescriptor>,
    chunk_delay: Duration,
    pub fail_metadata: AtomicBool,
    pub fail_streams: AtomicBool,
    /// Streams open fine but error before yielding any bytes.
    pub fail_first_chunk: AtomicBool,
    pub metadata_calls: AtomicUsize,
    pub stream_opens: AtomicUsize,
}

impl FakeSource {
    pub fn new(chunk_delay: Duration) -> Self {
        Self {
            renditions: vec![
                rendition("18", "mp4", "360p", true, true),
                rendition("140", "m4a", "128kbps", true, false),
                rendition("251", "webm", "160kbps", true, false),
                rendition("299", "mp4", "1080p", false, true),
                rendition("248", "webm", "1080p", false, true),
            ],
            chunk_delay,
            fail_metadata: AtomicBool::new(false),
            fail_streams: AtomicBool::new(false),
            fail_first_chunk: AtomicBool::new(false),
            metadata_calls: AtomicUsize::new(0),
            stream_opens: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StreamSource for FakeSource {
    async fn metadata(&self, _url: &str) -> mf_core::Result<SourceMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_metadata.load(Ordering::SeqCst) {
            return Err(Error::Provider("video is private".into()));
        }
        Ok(SourceMetadata {
            title: TITLE.into(),
            duration_seconds: Some(212.0),
            thumbnail_url: Some("https://i.ytimg.com/vi/dQw4w9WgXcQ/hq720.jpg".into()),
            renditions: self.renditions.clone(),
        })
    }

    async fn open_stream(&self, _url: &str, rendition_id: &str) -> mf_core::Result<ByteStream> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_streams.load(Ordering::SeqCst) {
            return Err(Error::Provider("HTTP 403 from media host".into()));
        }
        if !self.renditions.iter().any(|r| r.id == rendition_id) {
            return Err(Error::Validation(format!("unknown rendition: {rendition_id}")));
        }

        let body = body_for(rendition_id);
        let total = body.len() as u64;
        if self.fail_first_chunk.load(Ordering::SeqCst) {
            let chunks = futures::stream::iter([Err(Error::Provider(
                "HTTP 403 on first read".into(),
            ))]);
            return Ok(ByteStream {
                total: Some(total),
                chunks: chunks.boxed(),
            });
        }
        let delay = self.chunk_delay;
        let chunks: Vec<Bytes> = body.chunks(1024).map(Bytes::copy_from_slice).collect();
        let stream = futures::stream::iter(chunks).then(move |chunk| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, Error>(chunk)
        });
        Ok(ByteStream {
            total: Some(total),
            chunks: stream.boxed(),
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ---------------------------------------------------------------------------
// FakeMuxer
// ---------------------------------------------------------------------------

/// Concatenates both inputs behind a container signature, reporting
/// progress in quarters.
pub struct FakeMuxer {
    step_delay: Duration,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl FakeMuxer {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Muxer for FakeMuxer {
    async fn mux(
        &self,
        request: &MuxRequest,
        on_progress: MuxProgressFn<'_>,
        _cancel: CancellationToken,
    ) -> mf_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::tool("ffmpeg", "exited with status 1"));
        }

        for step in 1..=3 {
            tokio::time::sleep(self.step_delay).await;
            on_progress(step as f64 / 4.0);
        }

        let mut out = match request.container {
            mf_core::Container::Mp4 => b"\x00\x00\x00\x20ftypisom".to_vec(),
            _ => vec![0x1A, 0x45, 0xDF, 0xA3],
        };
        out.extend(tokio::fs::read(&request.video).await?);
        out.extend(tokio::fs::read(&request.audio).await?);
        tokio::fs::write(&request.output, out).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub source: Arc<FakeSource>,
    pub muxer: Arc<FakeMuxer>,
    pub dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a harness with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a harness with a custom configuration. Work and artifact
    /// directories are always redirected into a fresh temp dir.
    pub fn with_config(mut config: Config) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        config.jobs.work_dir = Some(dir.path().join("work"));
        config.jobs.artifact_dir = Some(dir.path().join("artifacts"));

        let source = Arc::new(FakeSource::new(Duration::from_millis(5)));
        let muxer = Arc::new(FakeMuxer::new(Duration::from_millis(20)));
        let downloads = DownloadService::build(source.clone(), muxer.clone(), &config.jobs);
        let ctx = AppContext::new(config, Arc::new(ToolRegistry::default()), downloads);

        Self {
            ctx,
            source,
            muxer,
            dir,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::with_server_config(Config::default()).await
    }

    /// Start an Axum server with custom config on a random port.
    pub async fn with_server_config(config: Config) -> (Self, SocketAddr) {
        let harness = Self::with_config(config);
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    pub fn downloads(&self) -> &DownloadService {
        &self.ctx.downloads
    }

    /// Poll a job until it is terminal, returning every snapshot seen.
    pub async fn wait_for(&self, id: mf_core::JobId) -> Vec<DownloadJob> {
        let mut seen = Vec::new();
        for _ in 0..500 {
            let job = self.ctx.jobs().snapshot(id).expect("job vanished");
            let done = job.state.is_terminal();
            seen.push(job);
            if done {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never finished");
    }

    pub fn artifact_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("artifacts")
    }

    pub fn work_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("work")
    }
}

/// Build a `/api/download` query for the test video.
pub fn download_query(itag: &str, download_id: Option<&str>) -> Vec<(&'static str, String)> {
    let mut q = vec![("url", VIDEO_URL.to_string()), ("itag", itag.to_string())];
    if let Some(id) = download_id {
        q.push(("downloadId", id.to_string()));
    }
    q
}
