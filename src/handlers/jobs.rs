//! Job HTTP handlers.
//!
//! - POST /api/v1/jobs - upload a video and start the pipeline
//! - GET /api/v1/jobs - list jobs
//! - GET /api/v1/jobs/{id} - job status
//! - DELETE /api/v1/jobs/{id} - remove a job and its files
//! - GET /api/v1/jobs/{id}/transcript?format= - export the transcript
//! - GET /api/v1/jobs/{id}/srt - current SRT
//! - PUT /api/v1/jobs/{id}/srt - re-render with an edited SRT
//! - GET /api/v1/jobs/{id}/video - download the rendered video

use crate::db::{self, Job, JobStatus};
use crate::error::AppError;
use crate::handlers::AppState;
use crate::jobs::{JobError, current_transcript};
use crate::render::SubtitleStyle;
use crate::transcribe::WhisperModel;
use crate::transcription::ExportFormat;
use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub model: String,
    pub source_name: Option<String>,
    pub status: JobStatus,
    pub progress: i64,
    pub style: serde_json::Value,
    pub has_transcript: bool,
    /// Set once a rendered video can be downloaded
    pub video_url: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let video_url = (job.status == JobStatus::Completed && job.output_path.is_some())
            .then(|| format!("/api/v1/jobs/{}/video", job.id));

        Self {
            style: serde_json::from_str(&job.style).unwrap_or(serde_json::Value::Null),
            has_transcript: job.transcript.is_some(),
            video_url,
            id: job.id,
            model: job.model,
            source_name: job.source_name,
            status: job.status,
            progress: job.progress,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub srt: String,
    /// Replaces the job's style when given
    pub style: Option<SubtitleStyle>,
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::InvalidRequest(format!("Malformed upload: {}", e.body_text()))
}

fn is_mp4(file_name: Option<&str>, content_type: Option<&str>) -> bool {
    let by_name = file_name.is_some_and(|name| name.to_lowercase().ends_with(".mp4"));
    let by_type = content_type.is_some_and(|ct| ct.eq_ignore_ascii_case("video/mp4"));
    by_name || by_type
}

/// Upload a video and start processing.
///
/// Multipart fields: `video` (MP4 file, required), `model` (defaults to the
/// server's default model), `style` (JSON, defaults to the default style).
/// Responds 202 with the queued job.
pub async fn create_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobResponse>), AppError> {
    let mut video: Option<(Option<String>, Bytes)> = None;
    let mut model = state.default_model;
    let mut style = SubtitleStyle::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video" => {
                let file_name = field.file_name().map(str::to_string);
                if !is_mp4(file_name.as_deref(), field.content_type()) {
                    return Err(AppError::InvalidRequest("Only MP4 videos are supported".to_string()));
                }
                let data = field.bytes().await.map_err(multipart_error)?;
                video = Some((file_name, data));
            }
            "model" => {
                let text = field.text().await.map_err(multipart_error)?;
                if !text.trim().is_empty() {
                    model = text.trim().parse::<WhisperModel>().map_err(AppError::InvalidRequest)?;
                }
            }
            "style" => {
                let text = field.text().await.map_err(multipart_error)?;
                if !text.trim().is_empty() {
                    style = serde_json::from_str(&text)
                        .map_err(|e| AppError::InvalidRequest(format!("Invalid style JSON: {}", e)))?;
                }
            }
            _ => {}
        }
    }

    let (file_name, data) = video.ok_or_else(|| AppError::InvalidRequest("Missing `video` field".to_string()))?;
    let job = state.jobs.create_job(&data, file_name, model, style).await?;

    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<JobResponse>>, AppError> {
    let jobs = db::list_jobs(state.jobs.pool()).await?;
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    let job = state.jobs.get(&id).await?;
    Ok(Json(job.into()))
}

pub async fn delete_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    state.jobs.delete_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Export the transcript, edits included, as json, json-pretty, srt, vtt or text
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TranscriptQuery>,
) -> Result<Response, AppError> {
    let format = match query.format.as_deref() {
        Some(f) => f.parse::<ExportFormat>().map_err(AppError::InvalidRequest)?,
        None => ExportFormat::Json,
    };

    let job = state.jobs.get(&id).await?;
    let transcript = current_transcript(&job)?.ok_or(JobError::NoTranscript)?;

    Ok(([(header::CONTENT_TYPE, format.content_type())], transcript.export(format)).into_response())
}

pub async fn get_srt(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let job = state.jobs.get(&id).await?;
    let srt = job.srt.ok_or(JobError::NoTranscript)?;

    Ok(([(header::CONTENT_TYPE, ExportFormat::Srt.content_type())], srt).into_response())
}

/// Re-render the video from an edited SRT.
///
/// ```json
/// { "srt": "1\n00:00:00,000 --> 00:00:02,000\nHello there\n", "style": null }
/// ```
pub async fn put_srt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RegenerateRequest>,
) -> Result<(StatusCode, Json<JobResponse>), AppError> {
    let job = state.jobs.regenerate(&id, request.srt, request.style).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

pub async fn get_video(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let job = state.jobs.get(&id).await?;
    let path = state
        .jobs
        .output_file(&job)
        .ok_or_else(|| AppError::NotFound("No rendered video for this job".to_string()))?;

    let data = tokio::fs::read(&path).await.map_err(|e| AppError::Internal(e.to_string()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output.mp4");

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name)),
        ],
        data,
    )
        .into_response())
}
