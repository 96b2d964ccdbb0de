//! Stream control route handlers.

use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;

use lc_av::StreamConfig;
use lc_core::events::LogLine;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;
use crate::session::{SessionStatus, StopReport};

/// Request body for starting a stream.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct StartStreamRequest {
    /// Media file names inside the media directory, in playback order.
    #[serde(default)]
    pub media: Vec<String>,
    /// Destination key substituted into the ingest URL.
    #[serde(default)]
    pub key: String,
    /// Portrait 720x1280 output.
    #[serde(default)]
    pub shorts: bool,
}

impl From<StartStreamRequest> for StreamConfig {
    fn from(req: StartStreamRequest) -> Self {
        StreamConfig::new(
            req.media.into_iter().map(PathBuf::from).collect(),
            req.key,
            req.shorts,
        )
    }
}

/// Query parameters for the log tail.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct LogsParams {
    /// Number of most recent lines to return.
    pub limit: Option<usize>,
}

/// POST /api/stream/start
#[utoipa::path(
    post,
    path = "/api/stream/start",
    request_body = StartStreamRequest,
    responses(
        (status = 201, description = "Stream started", body = SessionStatus),
        (status = 400, description = "Missing media or key, or invalid key"),
        (status = 409, description = "A stream is already running"),
        (status = 502, description = "ffmpeg is not available")
    )
)]
pub async fn start_stream(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<StartStreamRequest>,
) -> Result<impl IntoResponse, AppError> {
    ctx.session
        .start(payload.into())
        .map_err(|e| AppError::from(e).with_request_id(request_id.0))?;
    Ok((StatusCode::CREATED, Json(ctx.session.status())))
}

/// POST /api/stream/stop
#[utoipa::path(
    post,
    path = "/api/stream/stop",
    responses(
        (status = 200, description = "Stream stopped (or nothing was running)", body = StopReport)
    )
)]
pub async fn stop_stream(State(ctx): State<AppContext>) -> Json<StopReport> {
    Json(ctx.session.stop().await)
}

/// GET /api/stream/status
#[utoipa::path(
    get,
    path = "/api/stream/status",
    responses(
        (status = 200, description = "Current session status", body = SessionStatus)
    )
)]
pub async fn stream_status(State(ctx): State<AppContext>) -> Json<SessionStatus> {
    Json(ctx.session.status())
}

/// GET /api/stream/logs
#[utoipa::path(
    get,
    path = "/api/stream/logs",
    params(LogsParams),
    responses(
        (status = 200, description = "Recent log lines, oldest first", body = Vec<LogLine>)
    )
)]
pub async fn stream_logs(
    State(ctx): State<AppContext>,
    Query(params): Query<LogsParams>,
) -> Json<Vec<LogLine>> {
    let limit = params.limit.unwrap_or(ctx.config.stream.log_capacity);
    Json(ctx.session.logs(limit))
}
