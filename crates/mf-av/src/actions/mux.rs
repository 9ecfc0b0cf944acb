//! Combining a video-only and an audio-only track into one container.
//!
//! The [`Muxer`] trait is the seam between the job pipeline and whatever
//! actually performs the stream copy. [`FfmpegMuxer`] is the production
//! implementation; tests substitute their own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use mf_core::Container;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Hard ceiling for a single ffmpeg invocation. The job-level execution
/// timeout normally fires first.
const MUX_TIMEOUT: Duration = Duration::from_secs(4 * 3600);

/// Inputs and output of a mux operation.
#[derive(Debug, Clone)]
pub struct MuxRequest {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub output: PathBuf,
    pub container: Container,
    /// Source duration, used to turn muxer timestamps into a fraction.
    pub duration_secs: Option<f64>,
}

/// Receives mux progress as a fraction in `0.0..=1.0`.
pub type MuxProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Something that can mux separate video and audio files into one container.
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Produce `request.output` from `request.video` and `request.audio`.
    ///
    /// Must return an error if the underlying process fails. Implementations
    /// stop work promptly when `cancel` fires.
    async fn mux(
        &self,
        request: &MuxRequest,
        on_progress: MuxProgressFn<'_>,
        cancel: CancellationToken,
    ) -> mf_core::Result<()>;
}

/// Stream-copy muxer backed by `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    ffmpeg: PathBuf,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }

    /// Build a muxer from the registry, failing if ffmpeg was not discovered.
    pub fn from_registry(tools: &ToolRegistry) -> mf_core::Result<Self> {
        let ffmpeg = tools.require("ffmpeg")?;
        Ok(Self::new(ffmpeg.path.clone()))
    }

    /// The ffmpeg invocation for `request`.
    pub fn command(&self, request: &MuxRequest) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.timeout(MUX_TIMEOUT);
        cmd.args(["-y", "-progress", "pipe:2", "-nostats"]);
        cmd.arg("-i");
        cmd.arg(request.video.to_string_lossy().as_ref());
        cmd.arg("-i");
        cmd.arg(request.audio.to_string_lossy().as_ref());
        cmd.args(["-map", "0:v:0", "-map", "1:a:0", "-c", "copy"]);
        if request.container == Container::Mp4 {
            cmd.args(["-movflags", "+faststart"]);
        }
        cmd.args(["-f", muxer_format(request.container)]);
        cmd.arg(request.output.to_string_lossy().as_ref());
        cmd
    }
}

fn muxer_format(container: Container) -> &'static str {
    match container {
        Container::Mp4 => "mp4",
        Container::Webm => "webm",
        Container::Mkv => "matroska",
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(
        &self,
        request: &MuxRequest,
        on_progress: MuxProgressFn<'_>,
        cancel: CancellationToken,
    ) -> mf_core::Result<()> {
        tracing::info!(
            video = %request.video.display(),
            audio = %request.audio.display(),
            output = %request.output.display(),
            container = %request.container,
            "ffmpeg mux"
        );

        let mut parser = ProgressParser::new(request.duration_secs);
        self.command(request)
            .execute_with_stderr_callback(
                |line| {
                    if let Some(fraction) = parser.feed(line) {
                        on_progress(fraction);
                    }
                },
                Some(cancel),
            )
            .await?;

        Ok(())
    }
}

/// Incremental parser for `ffmpeg -progress` key/value output.
///
/// Each block ends with a `progress=continue` or `progress=end` line; a
/// fraction is emitted at the end of every block once the output timestamp
/// and the source duration are known. `progress=end` always yields `1.0`.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration_secs: Option<f64>,
    last_out_time_us: Option<i64>,
}

impl ProgressParser {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs,
            last_out_time_us: None,
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();
        if let Some(val) = line.strip_prefix("out_time_us=") {
            // ffmpeg reports N/A before the first packet.
            if let Ok(us) = val.parse::<i64>() {
                self.last_out_time_us = Some(us);
            }
            None
        } else if let Some(state) = line.strip_prefix("progress=") {
            if state == "end" {
                return Some(1.0);
            }
            let (out_us, dur) = (self.last_out_time_us?, self.duration_secs?);
            if dur <= 0.0 {
                return None;
            }
            let elapsed_secs = out_us as f64 / 1_000_000.0;
            Some((elapsed_secs / dur).clamp(0.0, 1.0))
        } else {
            None
        }
    }
}

/// Check that a muxer output exists, is non-empty, and starts with the
/// signature of the expected container. Returns the file size.
pub async fn validate_output(path: &Path, container: Container) -> mf_core::Result<u64> {
    let size = tokio::fs::metadata(path)
        .await
        .map_err(|e| mf_core::Error::pipeline("mux", format!("muxer produced no output: {e}")))?
        .len();
    if size == 0 {
        return Err(mf_core::Error::pipeline("mux", "muxer produced an empty file"));
    }

    let mut head = [0u8; 12];
    let mut file = tokio::fs::File::open(path).await?;
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    if !container.matches_signature(&head[..filled]) {
        return Err(mf_core::Error::pipeline(
            "mux",
            format!("muxer output is not a valid {container} file"),
        ));
    }

    Ok(size)
}
