//! Media listing and upload route handlers.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::context::AppContext;
use crate::error::AppError;
use crate::media::{self, MediaEntry};

/// Names saved by an upload.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UploadResponse {
    pub saved: Vec<String>,
}

/// GET /api/media
#[utoipa::path(
    get,
    path = "/api/media",
    responses(
        (status = 200, description = "Selectable media files, sorted by name", body = Vec<MediaEntry>)
    )
)]
pub async fn list_media(State(ctx): State<AppContext>) -> Result<Json<Vec<MediaEntry>>, AppError> {
    Ok(Json(media::list_media(&ctx.config.media)?))
}

/// POST /api/media/upload
///
/// Every file part is streamed to `<name>.part` in the media directory and
/// renamed into place once complete.
#[utoipa::path(
    post,
    path = "/api/media/upload",
    request_body(content_type = "multipart/form-data", description = "One or more video files"),
    responses(
        (status = 201, description = "Files saved", body = UploadResponse),
        (status = 400, description = "Missing file, bad name or disallowed extension")
    )
)]
pub async fn upload_media(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let cfg = &ctx.config.media;
    let mut saved = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| lc_core::Error::validation(format!("malformed upload: {e}")))?
    {
        let Some(file_name) = field.file_name().map(String::from) else {
            continue;
        };
        let target = media::upload_target(cfg, &file_name)?;
        tokio::fs::create_dir_all(&cfg.dir)
            .await
            .map_err(lc_core::Error::from)?;

        let mut partial = target.clone().into_os_string();
        partial.push(".part");
        let partial = std::path::PathBuf::from(partial);

        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(lc_core::Error::from)?;
        let mut size: usize = 0;
        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(lc_core::Error::validation(format!("upload interrupted: {e}")).into());
                }
            };
            size += chunk.len();
            if size > cfg.max_upload_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(lc_core::Error::validation(format!(
                    "'{file_name}' exceeds the upload limit of {} bytes",
                    cfg.max_upload_bytes
                ))
                .into());
            }
            file.write_all(&chunk).await.map_err(lc_core::Error::from)?;
        }
        file.flush().await.map_err(lc_core::Error::from)?;
        drop(file);
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(lc_core::Error::from)?;

        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!("Uploaded {name} ({size} bytes)");
        saved.push(name);
    }

    if saved.is_empty() {
        return Err(lc_core::Error::validation("no files in upload").into());
    }
    Ok((StatusCode::CREATED, Json(UploadResponse { saved })))
}
