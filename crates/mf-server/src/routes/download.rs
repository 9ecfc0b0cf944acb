//! Download probe and start.
//!
//! `HEAD /api/download` classifies a rendition; for renditions that need
//! muxing it allocates a job and returns its id in `X-Download-Id`.
//! `GET /api/download` then either starts that mux job (202) or, for
//! renditions that already carry audio, streams the bytes directly.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use mf_core::{DownloadKind, Error, JobId};
use mf_jobs::JobState;

use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::{attachment_headers, download_id_header};

/// Header telling a probing client how the rendition will be delivered.
pub static X_DOWNLOAD_KIND: HeaderName = HeaderName::from_static("x-download-kind");

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct DownloadParams {
    /// Source video URL.
    pub url: String,
    /// Rendition id from `/api/info`.
    pub itag: String,
    /// Id returned by the probe; required for renditions that need muxing.
    pub download_id: Option<String>,
}

/// Acknowledgement of a started mux job.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStarted {
    pub download_id: String,
    pub status: JobState,
}

/// HEAD /api/download
#[utoipa::path(
    head,
    path = "/api/download",
    params(DownloadParams),
    responses(
        (status = 200, description = "Rendition classified; X-Download-Id set for mux renditions"),
        (status = 400, description = "Invalid URL or unknown rendition"),
        (status = 500, description = "Provider failure")
    )
)]
pub async fn probe_download(
    State(ctx): State<AppContext>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, AppError> {
    let outcome = ctx.downloads.probe(&params.url, &params.itag).await?;

    let mut headers: HeaderMap = attachment_headers(&outcome.filename, &outcome.content_type, None);
    headers.insert(
        X_DOWNLOAD_KIND.clone(),
        HeaderValue::from_static(match outcome.kind {
            DownloadKind::Direct => "direct",
            DownloadKind::Mux => "mux",
        }),
    );
    if let Some(id) = outcome.job_id {
        download_id_header(&mut headers, id);
    }

    Ok((StatusCode::OK, headers).into_response())
}

/// GET /api/download
#[utoipa::path(
    get,
    path = "/api/download",
    params(DownloadParams),
    responses(
        (status = 200, description = "Direct rendition bytes"),
        (status = 202, description = "Mux job started", body = DownloadStarted),
        (status = 400, description = "Invalid request, unknown download id, or mux rendition without a probed id"),
        (status = 500, description = "Provider failure")
    )
)]
pub async fn start_download(
    State(ctx): State<AppContext>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, AppError> {
    if let Some(raw) = params.download_id.as_deref() {
        let job_id: JobId = raw.parse().map_err(|_| {
            AppError::from(Error::Validation(format!("malformed download id: {raw}")))
        })?;
        let job = ctx
            .downloads
            .start(job_id, Some(&params.url), Some(&params.itag))?;
        let body = DownloadStarted {
            download_id: job.id.to_string(),
            status: job.state,
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let direct = ctx.downloads.stream_direct(&params.url, &params.itag).await?;
    tracing::info!(
        job_id = %direct.job_id,
        filename = %direct.filename,
        "Streaming direct download"
    );

    // Length is left open; the body ends with the provider stream.
    let mut headers = attachment_headers(&direct.filename, &direct.content_type, None);
    download_id_header(&mut headers, direct.job_id);

    Ok((StatusCode::OK, headers, Body::from_stream(direct.stream)).into_response())
}
