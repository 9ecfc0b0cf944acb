//! [`StreamSource`] backed by `yt-dlp`.
//!
//! Metadata comes from `yt-dlp -J` (one JSON document per video). Stream
//! bytes are fetched directly from the format URLs in that document with
//! `reqwest`, using the per-format HTTP headers yt-dlp reports. Extracted
//! documents are cached briefly so opening a stream right after a resolve
//! does not run the extractor again.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use serde::Deserialize;

use mf_av::{ToolCommand, ToolRegistry};
use mf_core::config::SourceConfig;
use mf_core::RenditionDescriptor;

use crate::source::{ByteStream, SourceMetadata, StreamSource};

// ---------------------------------------------------------------------------
// yt-dlp JSON shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InfoJson {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<FormatJson>,
}

#[derive(Debug, Deserialize)]
struct FormatJson {
    format_id: String,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    format_note: Option<String>,
    #[serde(default)]
    abr: Option<f64>,
    #[serde(default)]
    filesize: Option<u64>,
    #[serde(default)]
    filesize_approx: Option<u64>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
}

/// Where to fetch one format from.
#[derive(Debug, Clone)]
struct FormatLocation {
    url: String,
    headers: HashMap<String, String>,
}

/// Parsed extractor output.
///
/// Every format is listed in `metadata`; only those reachable with a plain
/// GET have a location.
#[derive(Debug, Clone)]
struct Extracted {
    metadata: SourceMetadata,
    locations: HashMap<String, FormatLocation>,
}

impl Extracted {
    fn location(&self, rendition_id: &str) -> mf_core::Result<&FormatLocation> {
        if let Some(location) = self.locations.get(rendition_id) {
            return Ok(location);
        }
        if self.metadata.renditions.iter().any(|r| r.id == rendition_id) {
            return Err(mf_core::Error::Validation(format!(
                "rendition {rendition_id} is not available as a direct stream"
            )));
        }
        Err(mf_core::Error::Validation(format!(
            "unknown rendition: {rendition_id}"
        )))
    }
}

/// yt-dlp reports a missing track as `"none"`.
fn codec(value: Option<&str>) -> Option<String> {
    match value {
        None | Some("none") | Some("") => None,
        Some(c) => Some(c.to_string()),
    }
}

fn parse_info(json: &str) -> mf_core::Result<Extracted> {
    let info: InfoJson = serde_json::from_str(json)
        .map_err(|e| mf_core::Error::Provider(format!("unreadable extractor output: {e}")))?;

    let mut renditions = Vec::with_capacity(info.formats.len());
    let mut locations = HashMap::new();

    for f in info.formats {
        // Storyboards and HLS/DASH manifests cannot be fetched with a plain GET.
        let fetchable_url = f
            .url
            .filter(|_| matches!(f.protocol.as_deref(), None | Some("http") | Some("https")));

        let video_codec = codec(f.vcodec.as_deref());
        let audio_codec = codec(f.acodec.as_deref());
        let has_video = video_codec.is_some();
        let has_audio = audio_codec.is_some();

        let quality_label = if has_video {
            f.height.map(|h| format!("{h}p"))
        } else {
            None
        };
        let quality = f
            .format_note
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| quality_label.clone())
            .or_else(|| f.abr.map(|abr| format!("{}kbps", abr.round() as u64)))
            .unwrap_or_else(|| f.format_id.clone());

        renditions.push(RenditionDescriptor {
            id: f.format_id.clone(),
            container: f.ext.unwrap_or_else(|| "bin".to_string()),
            quality,
            quality_label,
            has_audio,
            has_video,
            audio_codec,
            video_codec,
            filesize: f.filesize.or(f.filesize_approx),
            audio_bitrate: if has_audio { f.abr } else { None },
        });
        if let Some(url) = fetchable_url {
            locations.insert(
                f.format_id,
                FormatLocation {
                    url,
                    headers: f.http_headers,
                },
            );
        }
    }

    Ok(Extracted {
        metadata: SourceMetadata {
            title: info.title.unwrap_or_default(),
            duration_seconds: info.duration,
            thumbnail_url: info.thumbnail,
            renditions,
        },
        locations,
    })
}

// ---------------------------------------------------------------------------
// YtDlpSource
// ---------------------------------------------------------------------------

struct CacheEntry {
    fetched_at: Instant,
    extracted: Arc<Extracted>,
}

/// Stream source that shells out to yt-dlp.
pub struct YtDlpSource {
    ytdlp: PathBuf,
    client: reqwest::Client,
    timeout: Duration,
    cache_ttl: Duration,
    user_agent: String,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl YtDlpSource {
    pub fn new(ytdlp: PathBuf, config: &SourceConfig) -> mf_core::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| mf_core::Error::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            ytdlp,
            client,
            timeout: Duration::from_secs(config.metadata_timeout_secs),
            cache_ttl: Duration::from_secs(config.metadata_cache_secs),
            user_agent: config.user_agent.clone(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Build a source from the registry, failing if yt-dlp was not discovered.
    pub fn from_registry(tools: &ToolRegistry, config: &SourceConfig) -> mf_core::Result<Self> {
        let ytdlp = tools.require("yt-dlp")?;
        Self::new(ytdlp.path.clone(), config)
    }

    fn cached(&self, url: &str) -> Option<Arc<Extracted>> {
        let mut cache = self.cache.lock();
        let ttl = self.cache_ttl;
        cache.retain(|_, e| e.fetched_at.elapsed() < ttl);
        cache.get(url).map(|e| Arc::clone(&e.extracted))
    }

    async fn extract(&self, url: &str) -> mf_core::Result<Arc<Extracted>> {
        if let Some(hit) = self.cached(url) {
            tracing::debug!(url, "Metadata cache hit");
            return Ok(hit);
        }

        let started = Instant::now();
        let output = ToolCommand::new(self.ytdlp.clone())
            .args(["-J", "--no-playlist", "--no-warnings"])
            .arg(url)
            .timeout(self.timeout)
            .execute()
            .await
            .map_err(|e| mf_core::Error::Provider(e.to_string()))?;

        let extracted = Arc::new(parse_info(&output.stdout)?);
        tracing::info!(
            url,
            formats = extracted.metadata.renditions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Extracted source metadata"
        );

        self.cache.lock().insert(
            url.to_string(),
            CacheEntry {
                fetched_at: Instant::now(),
                extracted: Arc::clone(&extracted),
            },
        );
        Ok(extracted)
    }
}

#[async_trait]
impl StreamSource for YtDlpSource {
    async fn metadata(&self, url: &str) -> mf_core::Result<SourceMetadata> {
        Ok(self.extract(url).await?.metadata.clone())
    }

    async fn open_stream(&self, url: &str, rendition_id: &str) -> mf_core::Result<ByteStream> {
        let extracted = self.extract(url).await?;
        let location = extracted.location(rendition_id)?;

        let mut request = self.client.get(&location.url);
        if !location
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("user-agent"))
        {
            request = request.header(reqwest::header::USER_AGENT, &self.user_agent);
        }
        for (name, value) in &location.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| mf_core::Error::Provider(format!("stream request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(mf_core::Error::Provider(format!(
                "stream request for rendition {rendition_id} returned {status}"
            )));
        }

        let total = response.content_length();
        let chunks = response
            .bytes_stream()
            .map_err(|e| mf_core::Error::Provider(format!("stream interrupted: {e}")))
            .boxed();

        Ok(ByteStream { total, chunks })
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}
