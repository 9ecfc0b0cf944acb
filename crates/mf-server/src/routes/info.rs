//! Rendition catalog lookup.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use mf_core::RenditionDescriptor;
use mf_source::MediaCatalog;

use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct InfoParams {
    /// Source video URL.
    pub url: String,
}

/// One downloadable rendition.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FormatResponse {
    pub itag: String,
    pub quality: String,
    pub quality_label: Option<String>,
    pub container: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    pub filesize: Option<u64>,
    pub audio_bitrate: Option<f64>,
}

impl From<&RenditionDescriptor> for FormatResponse {
    fn from(r: &RenditionDescriptor) -> Self {
        Self {
            itag: r.id.clone(),
            quality: r.quality.clone(),
            quality_label: r.quality_label.clone(),
            container: r.container.clone(),
            has_video: r.has_video,
            has_audio: r.has_audio,
            audio_codec: r.audio_codec.clone(),
            video_codec: r.video_codec.clone(),
            filesize: r.filesize,
            audio_bitrate: r.audio_bitrate,
        }
    }
}

/// Title, suggested filename stem, and the renditions of a video.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub title: String,
    /// Filename stem, without extension.
    pub filename: String,
    /// Duration in seconds.
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub available_formats: Vec<FormatResponse>,
}

impl From<MediaCatalog> for InfoResponse {
    fn from(c: MediaCatalog) -> Self {
        Self {
            available_formats: c.renditions.iter().map(FormatResponse::from).collect(),
            title: c.title,
            filename: c.filename,
            duration: c.duration_seconds,
            thumbnail: c.thumbnail_url,
        }
    }
}

/// GET /api/info
#[utoipa::path(
    get,
    path = "/api/info",
    params(InfoParams),
    responses(
        (status = 200, description = "Rendition catalog", body = InfoResponse),
        (status = 400, description = "Invalid source URL"),
        (status = 500, description = "Provider failure")
    )
)]
pub async fn get_info(
    State(ctx): State<AppContext>,
    Query(params): Query<InfoParams>,
) -> Result<Json<InfoResponse>, AppError> {
    let catalog = ctx.downloads.catalog(&params.url).await?;
    tracing::debug!(
        title = %catalog.title,
        renditions = catalog.renditions.len(),
        "Catalog resolved"
    );
    Ok(Json(catalog.into()))
}
