//! The stream source seam.
//!
//! A [`StreamSource`] turns a source URL into metadata and rendition byte
//! streams. Everything above it (resolver, jobs, server) is provider-agnostic.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use mf_core::RenditionDescriptor;

/// Metadata for one source video.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    pub title: String,
    pub duration_seconds: Option<f64>,
    pub thumbnail_url: Option<String>,
    /// Renditions in provider order.
    pub renditions: Vec<RenditionDescriptor>,
}

/// A finite stream of rendition bytes.
pub struct ByteStream {
    /// Total size in bytes when the provider declares it.
    pub total: Option<u64>,
    pub chunks: BoxStream<'static, mf_core::Result<Bytes>>,
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Provider of metadata and rendition bytes.
///
/// Failures are reported as [`mf_core::Error::Provider`]; asking for a
/// rendition the source does not offer is a [`mf_core::Error::Validation`].
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Fetch title, duration, and the rendition list for `url`.
    async fn metadata(&self, url: &str) -> mf_core::Result<SourceMetadata>;

    /// Open the byte stream of one rendition.
    async fn open_stream(&self, url: &str, rendition_id: &str) -> mf_core::Result<ByteStream>;

    /// Short provider name for logs and health output.
    fn name(&self) -> &'static str;
}
