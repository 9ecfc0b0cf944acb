//! Retrieval of finished mux artifacts.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::{attachment_headers, download_id_header, parse_download_id};

/// GET /api/download-file/{id}
#[utoipa::path(
    get,
    path = "/api/download-file/{id}",
    params(("id" = String, Path, description = "Download id")),
    responses(
        (status = 200, description = "The muxed file"),
        (status = 404, description = "Not completed, already retrieved, or expired")
    )
)]
pub async fn download_file(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let job_id = parse_download_id(&id)?;
    let artifact = ctx.downloads.retrieve(job_id).await?;

    let mut headers = attachment_headers(&artifact.filename, &artifact.content_type, Some(artifact.size));
    download_id_header(&mut headers, job_id);

    let body = Body::from_stream(artifact.into_stream());
    Ok((StatusCode::OK, headers, body).into_response())
}
