//! Health check endpoint for service monitoring.

use crate::config::BuildVariant;
use crate::error::AppError;
use crate::handlers::AppState;
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// `gpu` or `cpu`, fixed at build time
    pub build_variant: &'static str,
    pub database: String,
    pub ffmpeg_available: bool,
    pub font_available: bool,
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// Fails with 500 when the database is unreachable. A missing ffmpeg or font
/// is reported but does not fail the check, since listing models and
/// downloading them still works.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1").execute(state.jobs.pool()).await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        build_variant: BuildVariant::current().as_str(),
        database: "connected".to_string(),
        ffmpeg_available: state.jobs.ffmpeg().is_some(),
        font_available: state.jobs.font().is_some(),
        timestamp: Utc::now(),
    }))
}
