//! Whisper model registry endpoints:
//! - GET /api/v1/models - list models and their download state
//! - POST /api/v1/models/{name}/download - fetch a model in the background

use crate::error::AppError;
use crate::handlers::AppState;
use crate::transcribe::{ModelInfo, WhisperModel};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub model: WhisperModel,
    pub status: &'static str,
}

pub async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    Json(state.jobs.models().list())
}

/// Start downloading a model.
///
/// 200 when it is already on disk, 202 when a download was started and 409
/// when one is already running.
pub async fn download_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<DownloadResponse>), AppError> {
    let model: WhisperModel = name.parse().map_err(AppError::InvalidRequest)?;
    let store = Arc::clone(state.jobs.models());

    if store.is_downloaded(model) {
        return Ok((
            StatusCode::OK,
            Json(DownloadResponse {
                model,
                status: "downloaded",
            }),
        ));
    }

    store.begin_download(model)?;
    info!("Starting background download of {}", model);
    tokio::spawn(async move {
        if let Ok(path) = store.download(model).await {
            info!("Model {} ready at {:?}", model, path);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(DownloadResponse {
            model,
            status: "downloading",
        }),
    ))
}
