//! HTTP request handlers and the router that wires them up.

/// Health check endpoint
pub mod health;
/// Job upload, status, transcript and video endpoints
pub mod jobs;
/// Whisper model registry endpoints
pub mod models;
/// Style preview endpoint
pub mod preview;

use crate::jobs::JobRunner;
use crate::transcribe::WhisperModel;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobRunner>,
    /// Model used when an upload does not name one
    pub default_model: WhisperModel,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/models", get(models::list_models))
        .route("/api/v1/models/{name}/download", post(models::download_model))
        .route("/api/v1/preview", post(preview::preview))
        .route("/api/v1/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/api/v1/jobs/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/api/v1/jobs/{id}/transcript", get(jobs::get_transcript))
        .route("/api/v1/jobs/{id}/srt", get(jobs::get_srt).put(jobs::put_srt))
        .route("/api/v1/jobs/{id}/video", get(jobs::get_video))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::transcribe::ModelStore;
    use crate::transcription::{
        SpeechEngine, Transcribed, Transcript, TranscriptSegment, TranscriptWord, WhisperError,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
        response::Response,
    };
    use std::path::Path;
    use tower::ServiceExt;

    struct SilentEngine;

    impl SpeechEngine for SilentEngine {
        fn transcribe(&self, _model_path: &Path, _samples: &[f32]) -> Result<Transcribed, WhisperError> {
            Ok(Transcribed {
                segments: Vec::new(),
                language: None,
            })
        }
    }

    async fn app(root: &Path) -> (Router, AppState) {
        let pool = db::test_pool().await;
        let models = Arc::new(ModelStore::new(root.join("models"), None));
        let runner = JobRunner::new(pool, root.join("jobs"), models, Arc::new(SilentEngine), 1);
        let state = AppState {
            jobs: Arc::new(runner),
            default_model: WhisperModel::TinyEn,
        };
        (router(state.clone(), 1024 * 1024), state)
    }

    async fn seed_completed_job(state: &AppState, id: &str) {
        let mut transcript = Transcript::new("clip.mp4", 3.0);
        transcript.add_segment(TranscriptSegment {
            id: 0,
            start: 0.0,
            end: 1.5,
            words: vec![
                TranscriptWord::new("hello", 0.0, 0.7),
                TranscriptWord::new("world", 0.8, 1.5),
            ],
        });

        let pool = state.jobs.pool();
        db::insert_job(pool, id, "tiny.en", "{}", Some("clip.mp4")).await.unwrap();
        db::set_transcript(pool, id, &transcript.to_json(), &transcript.to_srt())
            .await
            .unwrap();
        db::set_completed(pool, id, "/nonexistent/output.mp4").await.unwrap();
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_str(&body_string(response).await).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path()).await;

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["ffmpeg_available"], false);
        assert!(body["build_variant"] == "cpu" || body["build_variant"] == "gpu");
    }

    #[tokio::test]
    async fn test_list_models() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path()).await;

        let response = app.oneshot(get("/api/v1/models")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let models = body.as_array().unwrap();
        assert_eq!(models.len(), 4);
        assert_eq!(models[0]["name"], "tiny.en");
        assert_eq!(models[0]["downloaded"], false);
        assert!(models[0]["last_error"].is_null());
    }

    #[tokio::test]
    async fn test_download_existing_model_and_unknown_model() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(dir.path()).await;

        let models = state.jobs.models();
        std::fs::create_dir_all(models.dir()).unwrap();
        let file = std::fs::File::create(models.path(WhisperModel::TinyEn)).unwrap();
        file.set_len(WhisperModel::TinyEn.size_mb() * 1024 * 1024).unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/models/tiny/download")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "downloaded");

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/models/huge/download")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_download_in_progress_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(dir.path()).await;
        state.jobs.models().begin_download(WhisperModel::BaseEn).unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/models/base.en/download")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"]["code"], "download_in_progress");
    }

    #[tokio::test]
    async fn test_preview_without_font_or_with_bad_style() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path()).await;

        let bad = serde_json::json!({"style": {"font_size": 2}});
        let response = app.clone().oneshot(json_request("POST", "/api/v1/preview", bad)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "invalid_style");

        let ok = serde_json::json!({"orientation": "vertical"});
        let response = app.oneshot(json_request("POST", "/api/v1/preview", ok)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_create_job_requires_video() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path()).await;

        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"model\"\r\n\r\ntiny.en\r\n--{b}--\r\n",
            b = boundary
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/jobs")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_job_rejects_non_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path()).await;

        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"video\"; filename=\"clip.avi\"\r\n\
             Content-Type: video/x-msvideo\r\n\r\nRIFF\r\n--{b}--\r\n",
            b = boundary
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/jobs")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "Only MP4 videos are supported");
    }

    #[tokio::test]
    async fn test_job_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(dir.path()).await;
        seed_completed_job(&state, "job-1").await;

        let response = app.clone().oneshot(get("/api/v1/jobs")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

        let response = app.clone().oneshot(get("/api/v1/jobs/job-1")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["progress"], 100);
        assert_eq!(body["has_transcript"], true);
        assert_eq!(body["video_url"], "/api/v1/jobs/job-1/video");

        let response = app.clone().oneshot(get("/api/v1/jobs/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "job_not_found");

        // The recorded output path does not exist on disk
        let response = app.oneshot(get("/api/v1/jobs/job-1/video")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_transcript_exports() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(dir.path()).await;
        seed_completed_job(&state, "job-1").await;

        let response = app.clone().oneshot(get("/api/v1/jobs/job-1/srt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            "1\n00:00:00,000 --> 00:00:01,500\nhello world\n\n"
        );

        let response = app
            .clone()
            .oneshot(get("/api/v1/jobs/job-1/transcript?format=vtt"))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/vtt");
        assert!(body_string(response).await.starts_with("WEBVTT"));

        let response = app
            .clone()
            .oneshot(get("/api/v1/jobs/job-1/transcript?format=text"))
            .await
            .unwrap();
        assert!(body_string(response).await.contains("hello world"));

        let response = app
            .oneshot(get("/api/v1/jobs/job-1/transcript?format=docx"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_put_srt_without_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(dir.path()).await;
        seed_completed_job(&state, "job-1").await;

        let srt = "1\n00:00:00,000 --> 00:00:01,500\nhello world\n\n";
        let request = json_request("PUT", "/api/v1/jobs/job-1/srt", serde_json::json!({"srt": srt}));
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "no_changes");

        let edited = "1\n00:00:00,000 --> 00:00:01,500\nhello there\n\n";
        let request = json_request("PUT", "/api/v1/jobs/job-1/srt", serde_json::json!({"srt": edited}));
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_delete_job() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(dir.path()).await;
        seed_completed_job(&state, "job-1").await;

        let request = Request::builder()
            .method("DELETE")
            .uri("/api/v1/jobs/job-1")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.oneshot(get("/api/v1/jobs/job-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
