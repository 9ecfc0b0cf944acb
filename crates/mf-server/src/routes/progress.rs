//! Job progress snapshots.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use mf_jobs::{DownloadJob, JobState};

use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::parse_download_id;

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub download_id: String,
    /// 0 to 100; exactly 100 only once completed.
    pub percentage: f64,
    pub stage: String,
    pub status: JobState,
    pub error: Option<String>,
}

impl From<DownloadJob> for ProgressResponse {
    fn from(job: DownloadJob) -> Self {
        Self {
            download_id: job.id.to_string(),
            percentage: job.percentage,
            stage: job.stage,
            status: job.state,
            error: job.error,
        }
    }
}

/// GET /api/progress/{id}
#[utoipa::path(
    get,
    path = "/api/progress/{id}",
    params(("id" = String, Path, description = "Download id")),
    responses(
        (status = 200, description = "Current progress", body = ProgressResponse),
        (status = 404, description = "Unknown or expired download")
    )
)]
pub async fn get_progress(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<ProgressResponse>, AppError> {
    let job_id = parse_download_id(&id)?;
    let job = ctx.downloads.progress(job_id)?;
    Ok(Json(job.into()))
}
