//! Axum router construction.
//!
//! Builds the full application router with all route groups, middleware
//! layers, the OpenAPI document and static file serving for the panel.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health_check,
        routes::media::list_media,
        routes::media::upload_media,
        routes::stream::start_stream,
        routes::stream::stop_stream,
        routes::stream::stream_status,
        routes::stream::stream_logs,
        routes::admin::tools,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::media::UploadResponse,
        routes::stream::StartStreamRequest,
        crate::media::MediaEntry,
        crate::session::SessionStatus,
        crate::session::StreamSummary,
        crate::session::StopReport,
        crate::worker::WorkerState,
        lc_core::events::LogLine,
        lc_core::events::LogSource,
        lc_av::ToolInfo,
    ))
)]
struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = ctx.config.media.max_upload_bytes;

    let api = Router::new()
        // Media
        .route("/media", get(routes::media::list_media))
        .route(
            "/media/upload",
            post(routes::media::upload_media).layer(DefaultBodyLimit::max(upload_limit)),
        )
        // Stream control
        .route("/stream/start", post(routes::stream::start_stream))
        .route("/stream/stop", post(routes::stream::stop_stream))
        .route("/stream/status", get(routes::stream::stream_status))
        .route("/stream/logs", get(routes::stream::stream_logs))
        // SSE Events
        .route("/events", get(routes::events::events_handler))
        // Admin
        .route("/admin/tools", get(routes::admin::tools));

    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api", api)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    // Static file serving for the control panel.
    if let Some(dir) = static_dir {
        if dir.exists() {
            tracing::info!("Serving static files from {:?}", dir);
            let index_path = dir.join("index.html");
            app = app.fallback_service(
                tower_http::services::ServeDir::new(&dir)
                    .append_index_html_on_directories(true)
                    .not_found_service(tower_http::services::ServeFile::new(index_path)),
            );
        } else {
            tracing::warn!("Static directory {} does not exist; panel disabled", dir.display());
        }
    }

    app
}
