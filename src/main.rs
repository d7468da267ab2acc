//! Subtitley - burned-in subtitle service
//!
//! Upload an MP4, get it back with word-by-word highlighted subtitles.
//!
//! # Pipeline
//!
//! 1. ffmpeg extracts 16kHz mono audio from the upload
//! 2. whisper.cpp transcribes it with word timestamps
//! 3. Every frame is decoded, subtitles are drawn on it and the result is
//!    re-encoded with the original audio
//!
//! The SRT of a finished job can be edited and the video re-rendered without
//! transcribing again.

mod config;
mod db;
mod error;
mod handlers;
mod jobs;
mod media;
mod render;
mod transcribe;
mod transcription;

use anyhow::Context as _;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{BuildVariant, Config};
use handlers::AppState;
use jobs::JobRunner;
use media::FfmpegTools;
use render::SubtitleFont;
use transcribe::{ModelStore, WhisperModel};
use transcription::{WhisperConfig, WhisperEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    info!("Configuration loaded ({} build)", BuildVariant::current().as_str());

    let default_model: WhisperModel = config
        .default_model
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let pool = db::init_db(&config.database_url)
        .await
        .context("Failed to open the job database")?;
    info!("Database ready");

    std::fs::create_dir_all(&config.models_dir)
        .with_context(|| format!("Failed to create {:?}", config.models_dir))?;
    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("Failed to create {:?}", config.work_dir))?;

    let mut whisper = WhisperConfig::default().with_language(&config.whisper_language);
    if let Some(threads) = config.whisper_threads {
        whisper = whisper.with_threads(threads);
    }
    let engine = Arc::new(WhisperEngine::new(whisper));
    let models = Arc::new(ModelStore::new(&config.models_dir, config.hf_token.clone()));

    let ffmpeg = match FfmpegTools::locate(config.ffmpeg_path.as_deref(), config.ffprobe_path.as_deref()) {
        Ok(tools) => {
            if let Some(version) = tools.version() {
                info!("{}", version);
            }
            Some(tools)
        }
        Err(e) => {
            warn!("Video processing disabled: {}", e);
            None
        }
    };
    let font = SubtitleFont::try_load(config.font_path.as_deref());

    let runner = JobRunner::new(
        pool,
        &config.work_dir,
        models,
        engine,
        config.max_concurrent_jobs,
    )
    .with_font(font)
    .with_ffmpeg(ffmpeg);

    runner
        .recover_interrupted()
        .await
        .context("Failed to recover interrupted jobs")?;

    let state = AppState {
        jobs: Arc::new(runner),
        default_model,
    };
    let app = handlers::router(state, config.max_upload_mb * 1024 * 1024);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
