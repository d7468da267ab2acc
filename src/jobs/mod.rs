//! Job orchestration: upload → audio extraction → transcription → render.
//!
//! Each job lives in `WORK_DIR/<uuid>/` and has a row in the `jobs` table.
//! The blocking stages run on tokio's blocking pool, and a semaphore bounds
//! how many pipelines run at once.

use crate::db::{self, DbPool, Job, JobStatus};
use crate::media::{FfmpegTools, MediaError, VideoInfo};
use crate::render::{ResolvedStyle, StyleError, SubtitleFont, SubtitleStyle, VideoError, render_video};
use crate::transcribe::{AudioError, ModelError, ModelStore, WhisperModel, load_wav_samples};
use crate::transcription::{
    ExportFormat, SpeechEngine, SrtError, Transcribed, Transcript, WhisperError, apply_srt_edits,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task;
use tracing::{error, info, warn};
use uuid::Uuid;

const INPUT_FILE: &str = "input.mp4";
const AUDIO_FILE: &str = "audio.wav";
const OUTPUT_FILE: &str = "output.mp4";
const REGENERATED_FILE: &str = "regenerated_output.mp4";

/// Progress recorded once transcription has finished
const TRANSCRIBED_PROGRESS: u8 = 30;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found")]
    NotFound,
    #[error("Job is still being processed")]
    Busy,
    #[error("Job has no transcript yet")]
    NoTranscript,
    #[error("No changes detected in the SRT")]
    NoChanges,
    #[error("Uploaded video is empty")]
    EmptyUpload,
    #[error("Video has no audio track to transcribe")]
    NoAudioTrack,
    #[error("ffmpeg is not available on this server")]
    FfmpegUnavailable,
    #[error("No subtitle font is available on this server")]
    FontUnavailable,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Invalid style: {0}")]
    Style(#[from] StyleError),
    #[error("Invalid SRT: {0}")]
    Srt(#[from] SrtError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Whisper(#[from] WhisperError),
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stored job data is corrupt: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Background task failed: {0}")]
    Task(#[from] task::JoinError),
}

/// Everything the pipeline needs after the upload is accepted
struct PipelineInput {
    id: String,
    model: WhisperModel,
    model_path: PathBuf,
    source_name: String,
    style: ResolvedStyle,
    tools: FfmpegTools,
    font: Arc<SubtitleFont>,
}

struct RenderRequest {
    tools: FfmpegTools,
    font: Arc<SubtitleFont>,
    input: PathBuf,
    output: PathBuf,
    transcript: Transcript,
    style: ResolvedStyle,
}

/// Map a render percentage into `base..=100`
fn scale_progress(base: u8, percent: u8) -> u8 {
    let base = base.min(100) as u16;
    (base + (100 - base) * percent.min(100) as u16 / 100) as u8
}

/// Line endings and surrounding whitespace do not count as edits
fn normalize_srt(srt: &str) -> String {
    srt.replace("\r\n", "\n").trim().to_string()
}

/// The transcript as it currently reads: the Whisper output with any SRT
/// edits applied
pub fn current_transcript(job: &Job) -> Result<Option<Transcript>, JobError> {
    let Some(json) = job.transcript.as_deref() else {
        return Ok(None);
    };
    let original: Transcript = serde_json::from_str(json)?;

    match job.srt.as_deref() {
        Some(srt) if normalize_srt(srt) != normalize_srt(&original.to_srt()) => {
            Ok(Some(apply_srt_edits(srt, &original)?))
        }
        _ => Ok(Some(original)),
    }
}

pub struct JobRunner {
    pool: DbPool,
    work_dir: PathBuf,
    models: Arc<ModelStore>,
    engine: Arc<dyn SpeechEngine>,
    font: Option<Arc<SubtitleFont>>,
    ffmpeg: Option<FfmpegTools>,
    permits: Arc<Semaphore>,
}

impl JobRunner {
    pub fn new(
        pool: DbPool,
        work_dir: impl Into<PathBuf>,
        models: Arc<ModelStore>,
        engine: Arc<dyn SpeechEngine>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            pool,
            work_dir: work_dir.into(),
            models,
            engine,
            font: None,
            ffmpeg: None,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn with_font(mut self, font: Option<SubtitleFont>) -> Self {
        self.font = font.map(Arc::new);
        self
    }

    pub fn with_ffmpeg(mut self, ffmpeg: Option<FfmpegTools>) -> Self {
        self.ffmpeg = ffmpeg;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn models(&self) -> &Arc<ModelStore> {
        &self.models
    }

    pub fn ffmpeg(&self) -> Option<&FfmpegTools> {
        self.ffmpeg.as_ref()
    }

    pub fn font(&self) -> Option<Arc<SubtitleFont>> {
        self.font.clone()
    }

    pub fn job_dir(&self, id: &str) -> PathBuf {
        self.work_dir.join(id)
    }

    pub async fn get(&self, id: &str) -> Result<Job, JobError> {
        db::get_job(&self.pool, id).await?.ok_or(JobError::NotFound)
    }

    /// Rendered video of a completed job, if it is on disk
    pub fn output_file(&self, job: &Job) -> Option<PathBuf> {
        job.output_path
            .as_deref()
            .map(PathBuf::from)
            .filter(|path| path.is_file())
    }

    fn tools(&self) -> Result<(FfmpegTools, Arc<SubtitleFont>), JobError> {
        let tools = self.ffmpeg.clone().ok_or(JobError::FfmpegUnavailable)?;
        let font = self.font.clone().ok_or(JobError::FontUnavailable)?;
        Ok((tools, font))
    }

    /// Store the upload and start its pipeline in the background
    pub async fn create_job(
        self: &Arc<Self>,
        video: &[u8],
        source_name: Option<String>,
        model: WhisperModel,
        style: SubtitleStyle,
    ) -> Result<Job, JobError> {
        let resolved = style.resolve()?;
        let (tools, font) = self.tools()?;
        let model_path = self.models.require(model)?;
        if video.is_empty() {
            return Err(JobError::EmptyUpload);
        }

        let id = Uuid::new_v4().to_string();
        let dir = self.job_dir(&id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(INPUT_FILE), video).await?;

        let job = db::insert_job(
            &self.pool,
            &id,
            &model.to_string(),
            &serde_json::to_string(&style)?,
            source_name.as_deref(),
        )
        .await?;

        info!(
            "Created job {} ({} bytes, model {}, source {:?})",
            id,
            video.len(),
            model,
            source_name
        );

        let input = PipelineInput {
            id,
            model,
            model_path,
            source_name: source_name.unwrap_or_else(|| INPUT_FILE.to_string()),
            style: resolved,
            tools,
            font,
        };
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.run_pipeline(input).await });

        Ok(job)
    }

    async fn run_pipeline(self: Arc<Self>, input: PipelineInput) {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };

        let id = input.id.clone();
        match self.process(input).await {
            Ok(()) => info!("Job {} completed", id),
            Err(e) => self.fail(&id, &e).await,
        }
    }

    async fn fail(&self, id: &str, e: &JobError) {
        error!("Job {} failed: {}", id, e);
        if let Err(db_err) = db::set_failed(&self.pool, id, &e.to_string()).await {
            error!("Failed to record failure of job {}: {}", id, db_err);
        }
    }

    async fn process(&self, input: PipelineInput) -> Result<(), JobError> {
        let id = input.id.as_str();
        let dir = self.job_dir(id);
        let video_path = dir.join(INPUT_FILE);
        let audio_path = dir.join(AUDIO_FILE);

        db::update_status(&self.pool, id, JobStatus::ExtractingAudio, 0).await?;
        let info = probe(&input.tools, &video_path).await?;
        if !info.has_audio {
            return Err(JobError::NoAudioTrack);
        }

        let tools = input.tools.clone();
        let (from, to) = (video_path.clone(), audio_path.clone());
        task::spawn_blocking(move || tools.extract_audio(&from, &to)).await??;

        db::update_status(&self.pool, id, JobStatus::Transcribing, 10).await?;
        let engine = Arc::clone(&self.engine);
        let model_path = input.model_path.clone();
        let transcribed = task::spawn_blocking(move || -> Result<Transcribed, JobError> {
            let samples = load_wav_samples(&audio_path)?;
            Ok(engine.transcribe(&model_path, &samples)?)
        })
        .await??;

        let mut transcript = Transcript::new(input.source_name.clone(), info.duration_secs);
        transcript.metadata.model = Some(input.model.to_string());
        transcript.metadata.language = transcribed.language;
        for segment in transcribed.segments {
            transcript.add_segment(segment);
        }
        info!(
            "Job {}: transcribed {} segments, {} words",
            id,
            transcript.segments.len(),
            transcript.word_count()
        );

        for format in [ExportFormat::JsonPretty, ExportFormat::Srt] {
            let path = dir.join(format!("transcript.{}", format.extension()));
            if let Err(e) = transcript.save_to_file(&path, format) {
                warn!("Job {}: could not write {:?}: {}", id, path, e);
            }
        }

        db::set_transcript(&self.pool, id, &transcript.to_json(), &transcript.to_srt()).await?;
        db::update_status(&self.pool, id, JobStatus::Rendering, TRANSCRIBED_PROGRESS).await?;

        let output = dir.join(OUTPUT_FILE);
        let request = RenderRequest {
            tools: input.tools,
            font: input.font,
            input: video_path,
            output: output.clone(),
            transcript,
            style: input.style,
        };
        self.render(id, request, info, TRANSCRIBED_PROGRESS).await?;

        db::set_completed(&self.pool, id, &output.to_string_lossy()).await?;
        Ok(())
    }

    /// Run the frame renderer, recording progress as it goes
    async fn render(&self, id: &str, request: RenderRequest, info: VideoInfo, base: u8) -> Result<(), JobError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();

        let pool = self.pool.clone();
        let job_id = id.to_string();
        let reporter = tokio::spawn(async move {
            while let Some(percent) = rx.recv().await {
                let progress = scale_progress(base, percent);
                if let Err(e) = db::update_status(&pool, &job_id, JobStatus::Rendering, progress).await {
                    warn!("Job {}: could not record progress: {}", job_id, e);
                }
            }
        });

        let result = task::spawn_blocking(move || {
            render_video(
                &request.tools,
                &request.input,
                &request.output,
                &info,
                &request.transcript,
                &request.style,
                &request.font,
                |percent| {
                    let _ = tx.send(percent);
                },
            )
        })
        .await;

        if let Err(e) = reporter.await {
            warn!("Job {}: progress reporter stopped: {}", id, e);
        }
        result??;
        Ok(())
    }

    /// Re-render a finished job from an edited SRT, optionally with a new style
    pub async fn regenerate(
        self: &Arc<Self>,
        id: &str,
        edited_srt: String,
        style: Option<SubtitleStyle>,
    ) -> Result<Job, JobError> {
        let job = self.get(id).await?;
        if job.status.is_running() {
            return Err(JobError::Busy);
        }

        let original: Transcript = serde_json::from_str(job.transcript.as_deref().ok_or(JobError::NoTranscript)?)?;
        let stored_style: SubtitleStyle = serde_json::from_str(&job.style)?;
        let style_changed = style.as_ref().is_some_and(|s| *s != stored_style);
        let style = style.unwrap_or(stored_style);

        let srt_changed = job.srt.as_deref().map(normalize_srt) != Some(normalize_srt(&edited_srt));
        if !srt_changed && !style_changed {
            return Err(JobError::NoChanges);
        }

        let transcript = apply_srt_edits(&edited_srt, &original)?;
        let resolved = style.resolve()?;
        let (tools, font) = self.tools()?;

        let dir = self.job_dir(id);
        let request = RenderRequest {
            tools,
            font,
            input: dir.join(INPUT_FILE),
            output: dir.join(REGENERATED_FILE),
            transcript,
            style: resolved,
        };

        // The status check above is advisory; this update is the claim
        if !db::begin_regeneration(&self.pool, id, &edited_srt, &serde_json::to_string(&style)?).await? {
            return Err(self.claim_error(id).await);
        }
        info!(
            "Regenerating job {} ({} segments kept)",
            id,
            request.transcript.segments.len()
        );

        let runner = Arc::clone(self);
        let job_id = id.to_string();
        tokio::spawn(async move {
            let Ok(_permit) = Arc::clone(&runner.permits).acquire_owned().await else {
                return;
            };
            let output = request.output.clone();
            let result = async {
                let info = probe(&request.tools, &request.input).await?;
                runner.render(&job_id, request, info, 0).await?;
                db::set_completed(&runner.pool, &job_id, &output.to_string_lossy()).await?;
                Ok::<(), JobError>(())
            }
            .await;

            match result {
                Ok(()) => info!("Job {} regenerated", job_id),
                Err(e) => runner.fail(&job_id, &e).await,
            }
        });

        self.get(id).await
    }

    /// Why a finished job could not be claimed: it is gone or running
    async fn claim_error(&self, id: &str) -> JobError {
        match self.get(id).await {
            Ok(_) => JobError::Busy,
            Err(e) => e,
        }
    }

    /// Remove a finished job's record and directory
    pub async fn delete_job(&self, id: &str) -> Result<(), JobError> {
        if !db::delete_job(&self.pool, id).await? {
            return Err(self.claim_error(id).await);
        }

        let dir = self.job_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Job {}: could not remove {:?}: {}", id, dir, e),
        }

        info!("Deleted job {}", id);
        Ok(())
    }

    /// Fail jobs whose pipeline died with a previous process
    pub async fn recover_interrupted(&self) -> Result<u64, JobError> {
        let count = db::fail_interrupted(&self.pool).await?;
        if count > 0 {
            warn!("Marked {} interrupted job(s) as failed", count);
        }
        Ok(count)
    }
}

async fn probe(tools: &FfmpegTools, path: &Path) -> Result<VideoInfo, JobError> {
    let tools = tools.clone();
    let path = path.to_path_buf();
    Ok(task::spawn_blocking(move || tools.probe(&path)).await??)
}
