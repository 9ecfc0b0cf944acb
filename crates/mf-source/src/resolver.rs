//! Rendition catalog resolution.
//!
//! [`CatalogResolver`] validates a caller URL, asks the [`StreamSource`] for
//! metadata, and shapes the result into a [`MediaCatalog`]. It classifies but
//! never re-ranks or filters the provider's renditions.

use std::sync::Arc;

use mf_core::RenditionDescriptor;

use crate::filename::sanitize_stem;
use crate::source::StreamSource;
use crate::url::SourceRef;

/// Everything a caller needs to pick a rendition.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaCatalog {
    /// Canonical source URL the catalog was resolved from.
    pub source_url: String,
    pub title: String,
    pub duration_seconds: Option<f64>,
    pub thumbnail_url: Option<String>,
    /// Sanitized filename stem derived from the title.
    pub filename: String,
    pub renditions: Vec<RenditionDescriptor>,
}

impl MediaCatalog {
    /// Look up a rendition by id.
    ///
    /// # Errors
    ///
    /// Returns [`mf_core::Error::Validation`] if the catalog has no such
    /// rendition.
    pub fn rendition(&self, id: &str) -> mf_core::Result<&RenditionDescriptor> {
        self.renditions
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| mf_core::Error::Validation(format!("unknown rendition: {id}")))
    }

    /// Pick the audio-only rendition to pair with a video-only one.
    ///
    /// Prefers audio in the same container family as the video (m4a with mp4,
    /// webm with webm), then the highest audio bitrate. Returns `None` when
    /// the catalog has no audio-only rendition.
    pub fn select_companion_audio(
        &self,
        video: &RenditionDescriptor,
    ) -> Option<&RenditionDescriptor> {
        let family = container_family(&video.container);
        self.renditions
            .iter()
            .filter(|r| r.is_audio_only())
            .max_by(|a, b| {
                let a_match = container_family(&a.container) == family;
                let b_match = container_family(&b.container) == family;
                a_match.cmp(&b_match).then_with(|| {
                    a.audio_bitrate
                        .unwrap_or(0.0)
                        .total_cmp(&b.audio_bitrate.unwrap_or(0.0))
                })
            })
    }
}

fn container_family(container: &str) -> &'static str {
    match container.to_ascii_lowercase().as_str() {
        "mp4" | "m4a" | "m4v" | "mov" => "isobmff",
        "webm" | "weba" | "mkv" => "matroska",
        _ => "other",
    }
}

/// Resolves source URLs into rendition catalogs.
#[derive(Clone)]
pub struct CatalogResolver {
    source: Arc<dyn StreamSource>,
}

impl CatalogResolver {
    pub fn new(source: Arc<dyn StreamSource>) -> Self {
        Self { source }
    }

    /// The underlying stream source.
    pub fn source(&self) -> &Arc<dyn StreamSource> {
        &self.source
    }

    /// Resolve `url` into a catalog.
    ///
    /// # Errors
    ///
    /// - [`mf_core::Error::Validation`] if the URL is not an accepted source.
    /// - [`mf_core::Error::Provider`] if the source cannot produce metadata.
    pub async fn resolve(&self, url: &str) -> mf_core::Result<MediaCatalog> {
        let source_ref = SourceRef::parse(url)?;
        let source_url = source_ref.canonical_url();

        let metadata = self.source.metadata(&source_url).await.map_err(|e| match e {
            mf_core::Error::Provider(_) | mf_core::Error::Validation(_) => e,
            other => mf_core::Error::Provider(other.to_string()),
        })?;

        tracing::debug!(
            video_id = source_ref.video_id(),
            renditions = metadata.renditions.len(),
            "Resolved catalog"
        );

        Ok(MediaCatalog {
            filename: sanitize_stem(&metadata.title),
            source_url,
            title: metadata.title,
            duration_seconds: metadata.duration_seconds,
            thumbnail_url: metadata.thumbnail_url,
            renditions: metadata.renditions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ByteStream, SourceMetadata};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn rendition(id: &str, container: &str, audio: bool, video: bool, abr: Option<f64>) -> RenditionDescriptor {
        RenditionDescriptor {
            id: id.into(),
            container: container.into(),
            quality: id.into(),
            quality_label: None,
            has_audio: audio,
            has_video: video,
            audio_codec: audio.then(|| "aac".to_string()),
            video_codec: video.then(|| "avc1".to_string()),
            filesize: None,
            audio_bitrate: abr,
        }
    }

    struct StaticSource {
        result: Mutex<Option<mf_core::Result<SourceMetadata>>>,
        calls: Mutex<Vec<String>>,
    }

    impl StaticSource {
        fn new(result: mf_core::Result<SourceMetadata>) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(result)),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl StreamSource for StaticSource {
        async fn metadata(&self, url: &str) -> mf_core::Result<SourceMetadata> {
            self.calls.lock().push(url.to_string());
            self.result
                .lock()
                .take()
                .unwrap_or_else(|| Err(mf_core::Error::Provider("exhausted".into())))
        }

        async fn open_stream(&self, _url: &str, _id: &str) -> mf_core::Result<ByteStream> {
            Err(mf_core::Error::Provider("not streaming".into()))
        }

        fn name(&self) -> &'static str {
            "static"
        }
    }

    fn metadata() -> SourceMetadata {
        SourceMetadata {
            title: "My Great Video!".into(),
            duration_seconds: Some(60.0),
            thumbnail_url: None,
            renditions: vec![
                rendition("18", "mp4", true, true, Some(96.0)),
                rendition("299", "mp4", false, true, None),
                rendition("140", "m4a", true, false, Some(129.0)),
                rendition("251", "webm", true, false, Some(160.0)),
            ],
        }
    }

    #[tokio::test]
    async fn resolve_shapes_catalog() {
        let source = StaticSource::new(Ok(metadata()));
        let resolver = CatalogResolver::new(source.clone());
        let catalog = resolver.resolve("https://youtu.be/dQw4w9WgXcQ").await.unwrap();

        assert_eq!(catalog.title, "My Great Video!");
        assert_eq!(catalog.filename, "My-Great-Video");
        assert_eq!(catalog.source_url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        // Provider order is preserved.
        let ids: Vec<&str> = catalog.renditions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["18", "299", "140", "251"]);
        assert_eq!(source.calls.lock().as_slice(), ["https://www.youtube.com/watch?v=dQw4w9WgXcQ"]);
    }

    #[tokio::test]
    async fn invalid_url_never_reaches_provider() {
        let source = StaticSource::new(Ok(metadata()));
        let resolver = CatalogResolver::new(source.clone());
        let err = resolver.resolve("https://vimeo.com/1").await.unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert!(source.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_surfaced() {
        let source = StaticSource::new(Err(mf_core::Error::Provider("video is private".into())));
        let resolver = CatalogResolver::new(source);
        let err = resolver
            .resolve("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 500);
        assert!(err.to_string().contains("private"));
    }

    #[tokio::test]
    async fn unknown_rendition_is_input_error() {
        let resolver = CatalogResolver::new(StaticSource::new(Ok(metadata())));
        let catalog = resolver.resolve("https://youtu.be/dQw4w9WgXcQ").await.unwrap();
        assert_eq!(catalog.rendition("999").unwrap_err().http_status(), 400);
        assert_eq!(catalog.rendition("140").unwrap().container, "m4a");
    }

    #[tokio::test]
    async fn companion_audio_prefers_same_family() {
        let resolver = CatalogResolver::new(StaticSource::new(Ok(metadata())));
        let catalog = resolver.resolve("https://youtu.be/dQw4w9WgXcQ").await.unwrap();

        let mp4_video = catalog.rendition("299").unwrap().clone();
        let audio = catalog.select_companion_audio(&mp4_video).unwrap();
        assert_eq!(audio.id, "140");

        let webm_video = rendition("303", "webm", false, true, None);
        let audio = catalog.select_companion_audio(&webm_video).unwrap();
        assert_eq!(audio.id, "251");
    }

    #[test]
    fn companion_audio_falls_back_to_bitrate() {
        let catalog = MediaCatalog {
            source_url: String::new(),
            title: String::new(),
            duration_seconds: None,
            thumbnail_url: None,
            filename: "x".into(),
            renditions: vec![
                rendition("139", "m4a", true, false, Some(48.0)),
                rendition("140", "m4a", true, false, Some(129.0)),
            ],
        };
        let video = rendition("400", "flv", false, true, None);
        assert_eq!(catalog.select_companion_audio(&video).unwrap().id, "140");

        let empty = MediaCatalog {
            renditions: vec![],
            ..catalog
        };
        assert!(empty.select_companion_audio(&video).is_none());
    }
}
