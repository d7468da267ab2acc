//! Style preview endpoint: renders the sample line as a PNG.

use crate::error::AppError;
use crate::handlers::AppState;
use crate::render::{Orientation, SubtitleStyle, encode_png, render_preview};
use axum::{
    Json,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub style: SubtitleStyle,
    #[serde(default)]
    pub orientation: Orientation,
}

/// POST /api/v1/preview
///
/// ```json
/// { "style": { "font_size": 40, "word_case": "UPPERCASE" }, "orientation": "vertical" }
/// ```
pub async fn preview(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> Result<Response, AppError> {
    let style = request.style.resolve()?;
    let font = state
        .jobs
        .font()
        .ok_or_else(|| AppError::Unavailable("No subtitle font is available on this server".to_string()))?;

    let png = tokio::task::spawn_blocking(move || {
        encode_png(render_preview(&style, &font, request.orientation))
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}
