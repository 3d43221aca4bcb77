use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

use crate::upload::UploadError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub source: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = ?self.source, "request failed");
        } else {
            tracing::debug!(error = %self.source, "request rejected");
        }
        (
            self.status,
            Json(json!({ "error": self.source.to_string() })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let source = err.into();
        let status = source
            .downcast_ref::<UploadError>()
            .map(UploadError::status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self { status, source }
    }
}
