//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`lc_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and use `?` on core results.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
pub struct AppError {
    inner: lc_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: lc_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }
}

impl From<lc_core::Error> for AppError {
    fn from(e: lc_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        } else {
            tracing::debug!(status = %status, error = %self.inner, "Request rejected");
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_produces_400() {
        let err = AppError::new(lc_core::Error::validation("stream key is required"));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn conflict_produces_409() {
        let err = AppError::new(lc_core::Error::Conflict("already running".into()));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn missing_tool_produces_502() {
        let err = AppError::new(lc_core::Error::tool("ffmpeg", "not found"));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn with_request_id() {
        let err = AppError::new(lc_core::Error::Internal("oops".into()))
            .with_request_id("req-123".into());
        assert_eq!(err.request_id.as_deref(), Some("req-123"));
    }
}
