//! Error types and HTTP error response handling.
//!
//! Handlers return `Result<T, AppError>`; every error becomes a JSON body of
//! the form `{"error": {"code": "...", "message": "..."}}`.

use crate::jobs::JobError;
use crate::render::StyleError;
use crate::transcribe::ModelError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Invalid style: {0}")]
    Style(#[from] StyleError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Request body or parameters are invalid
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// A dependency of the request (ffmpeg, a font) is missing on this server
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

const INTERNAL_MESSAGE: &str = "An internal error occurred";

fn job_error_parts(e: &JobError) -> (StatusCode, &'static str) {
    match e {
        JobError::NotFound => (StatusCode::NOT_FOUND, "job_not_found"),
        JobError::Busy => (StatusCode::CONFLICT, "job_busy"),
        JobError::NoTranscript => (StatusCode::CONFLICT, "no_transcript"),
        JobError::NoChanges => (StatusCode::BAD_REQUEST, "no_changes"),
        JobError::EmptyUpload => (StatusCode::BAD_REQUEST, "invalid_request"),
        JobError::NoAudioTrack => (StatusCode::UNPROCESSABLE_ENTITY, "no_audio_track"),
        JobError::FfmpegUnavailable | JobError::FontUnavailable => {
            (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
        }
        JobError::Model(e) => model_error_parts(e),
        JobError::Style(_) => (StatusCode::BAD_REQUEST, "invalid_style"),
        JobError::Srt(_) => (StatusCode::BAD_REQUEST, "invalid_srt"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

fn model_error_parts(e: &ModelError) -> (StatusCode, &'static str) {
    match e {
        ModelError::NotDownloaded(_) => (StatusCode::CONFLICT, "model_not_downloaded"),
        ModelError::InProgress(_) => (StatusCode::CONFLICT, "download_in_progress"),
        ModelError::Io(_) | ModelError::Download(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Job(e) => job_error_parts(e),
            AppError::Model(e) => model_error_parts(e),
            AppError::Style(_) => (StatusCode::BAD_REQUEST, "invalid_style"),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
            AppError::Database(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

/// 5xx responses hide the underlying error from the client and log it instead
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();

        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!("Request failed: {}", self);
            INTERNAL_MESSAGE.to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::WhisperModel;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_client_errors_keep_their_message() {
        let response = AppError::Job(JobError::NoChanges).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "no_changes");
        assert_eq!(body["error"]["message"], "No changes detected in the SRT");
    }

    #[tokio::test]
    async fn test_server_errors_hide_details() {
        let response = AppError::Database(sqlx::Error::PoolClosed).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "internal_error");
        assert_eq!(body["error"]["message"], INTERNAL_MESSAGE);
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::Job(JobError::NotFound), StatusCode::NOT_FOUND),
            (AppError::Job(JobError::Busy), StatusCode::CONFLICT),
            (
                AppError::Model(ModelError::InProgress(WhisperModel::BaseEn)),
                StatusCode::CONFLICT,
            ),
            (
                AppError::Job(JobError::Model(ModelError::NotDownloaded(WhisperModel::TinyEn))),
                StatusCode::CONFLICT,
            ),
            (
                AppError::Job(JobError::FfmpegUnavailable),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AppError::InvalidRequest("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
