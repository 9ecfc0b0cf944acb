//! Admin views: external tools and job counts.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use mf_jobs::JobCounts;

use crate::context::AppContext;

#[derive(Serialize, utoipa::ToSchema)]
pub struct JobsResponse {
    pub total: usize,
    pub counts: JobCounts,
    pub source: String,
}

/// GET /api/admin/tools
#[utoipa::path(
    get,
    path = "/api/admin/tools",
    responses(
        (status = 200, description = "List external tool availability", body = Vec<mf_av::ToolInfo>)
    )
)]
pub async fn tools(State(ctx): State<AppContext>) -> Json<Vec<mf_av::ToolInfo>> {
    Json(ctx.tools.check_all())
}

/// GET /api/admin/jobs
#[utoipa::path(
    get,
    path = "/api/admin/jobs",
    responses((status = 200, description = "Job counts by state", body = JobsResponse))
)]
pub async fn jobs(State(ctx): State<AppContext>) -> Json<JobsResponse> {
    let jobs = ctx.jobs();
    Json(JobsResponse {
        total: jobs.len(),
        counts: jobs.counts(),
        source: ctx.downloads.source_name().to_string(),
    })
}
