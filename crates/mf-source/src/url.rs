//! Source URL validation.
//!
//! Only YouTube-shaped URLs are accepted: `watch?v=`, `/embed/`, `/v/`,
//! `/shorts/`, and `youtu.be/` forms, each carrying an 11-character video id.

use std::sync::LazyLock;

use regex::Regex;

static SOURCE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:[A-Za-z0-9-]+\.)?(?:youtube\.com/(?:(?:v|e(?:mbed)?|shorts|live)/|\S*?[?&]v=)|youtu\.be/)([A-Za-z0-9_-]{11})(?:[?&#/]\S*)?$",
    )
    .unwrap()
});

/// A validated reference to a source video.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    video_id: String,
}

impl SourceRef {
    /// Parse a caller-supplied URL.
    ///
    /// # Errors
    ///
    /// Returns [`mf_core::Error::Validation`] if the URL does not have an
    /// accepted shape.
    pub fn parse(url: &str) -> mf_core::Result<Self> {
        let url = url.trim();
        let video_id = SOURCE_URL
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| mf_core::Error::Validation(format!("invalid source url: {url:?}")))?;
        Ok(Self { video_id })
    }

    /// The 11-character video id.
    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// Canonical watch URL, used as the provider input and cache key.
    pub fn canonical_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}
