//! Axum router construction.

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::info::get_info,
        routes::download::probe_download,
        routes::download::start_download,
        routes::progress::get_progress,
        routes::files::download_file,
        routes::admin::tools,
        routes::admin::jobs,
    ),
    components(schemas(
        routes::info::InfoResponse,
        routes::info::FormatResponse,
        routes::download::DownloadStarted,
        routes::progress::ProgressResponse,
        routes::admin::JobsResponse,
        mf_jobs::JobCounts,
        mf_jobs::JobState,
        mf_av::ToolInfo,
    ))
)]
struct ApiDoc;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            routes::X_DOWNLOAD_ID.clone(),
            routes::download::X_DOWNLOAD_KIND.clone(),
            axum::http::header::CONTENT_DISPOSITION,
        ]);

    let api = Router::new()
        .route("/info", get(routes::info::get_info))
        .route(
            "/download",
            get(routes::download::start_download).head(routes::download::probe_download),
        )
        .route("/progress/{id}", get(routes::progress::get_progress))
        .route("/download-file/{id}", get(routes::files::download_file))
        .route("/admin/tools", get(routes::admin::tools))
        .route("/admin/jobs", get(routes::admin::jobs));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api)
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
