//! Media-domain types: renditions, download routing, and output containers.
//!
//! Enums serialize in lowercase (via `serde(rename_all = "lowercase")`) and
//! implement `Display` manually for consistent string representation.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// RenditionDescriptor
// ---------------------------------------------------------------------------

/// One encoded variant of the source media, as reported by the provider.
///
/// Produced fresh on every resolve call and never persisted. The order of a
/// rendition list is whatever the provider returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RenditionDescriptor {
    /// Provider-specific format identifier (e.g. `"140"`, `"299"`).
    pub id: String,
    /// Container / file extension reported by the provider (e.g. `"mp4"`).
    pub container: String,
    /// Human-readable quality (e.g. `"128kbps"`, `"1080p"`).
    pub quality: String,
    /// Video height label when the rendition carries video.
    pub quality_label: Option<String>,
    pub has_audio: bool,
    pub has_video: bool,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    /// Size in bytes, exact or approximate.
    pub filesize: Option<u64>,
    /// Audio bitrate in kbit/s.
    pub audio_bitrate: Option<f64>,
}

impl RenditionDescriptor {
    /// True for an audio-only rendition.
    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    /// True for a video-only rendition that needs a separate audio track.
    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }
}

// ---------------------------------------------------------------------------
// DownloadKind
// ---------------------------------------------------------------------------

/// How a rendition is delivered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    /// Bytes are relayed straight from the provider.
    Direct,
    /// Video and audio are fetched separately and muxed into one file.
    Mux,
}

impl DownloadKind {
    /// Route a rendition: video without audio needs muxing, anything that
    /// already carries audio (or carries neither track) is relayed directly.
    pub fn for_rendition(rendition: &RenditionDescriptor) -> Self {
        if rendition.is_video_only() {
            Self::Mux
        } else {
            Self::Direct
        }
    }
}

impl fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Mux => write!(f, "mux"),
        }
    }
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// Output containers a mux job can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
    Mkv,
}

impl Container {
    /// Pick the output container for a video stream and an audio stream.
    ///
    /// ISO-BMFF pairs stay MP4, WebM pairs stay WebM, and mixed pairs fall
    /// back to Matroska, which accepts any codec combination.
    pub fn for_mux(video_container: &str, audio_container: &str) -> Self {
        let video = video_container.to_ascii_lowercase();
        let audio = audio_container.to_ascii_lowercase();
        match (video.as_str(), audio.as_str()) {
            ("mp4", "m4a" | "mp4") => Self::Mp4,
            ("webm", "webm") => Self::Webm,
            _ => Self::Mkv,
        }
    }

    /// File extension for this container.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
        }
    }

    /// MIME type for this container.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
            Self::Mkv => "video/x-matroska",
        }
    }

    /// Check the leading bytes of a file against the container signature.
    ///
    /// MP4 carries an `ftyp` box at offset 4; WebM and Matroska start with the
    /// EBML magic `1A 45 DF A3`.
    pub fn matches_signature(&self, head: &[u8]) -> bool {
        match self {
            Self::Mp4 => head.len() >= 8 && &head[4..8] == b"ftyp",
            Self::Webm | Self::Mkv => head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]),
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Guess the MIME type for a directly relayed rendition.
pub fn guess_content_type(container: &str, has_video: bool) -> &'static str {
    match (container.to_ascii_lowercase().as_str(), has_video) {
        ("mp4", true) => "video/mp4",
        ("mp4" | "m4a", _) => "audio/mp4",
        ("webm", true) => "video/webm",
        ("webm", false) => "audio/webm",
        ("3gp", _) => "video/3gpp",
        ("mp3", _) => "audio/mpeg",
        ("mkv", _) => "video/x-matroska",
        _ => "application/octet-stream",
    }
}
