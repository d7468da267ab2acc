use serde::Serialize;
use sqlx::{SqlitePool, migrate::Migrator, sqlite::SqlitePoolOptions};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub type DbPool = SqlitePool;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Pipeline stage of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    ExtractingAudio,
    Transcribing,
    Rendering,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::ExtractingAudio => "extracting_audio",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Rendering => "rendering",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether a pipeline is still working on the job
    pub fn is_running(&self) -> bool {
        !matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "extracting_audio" => Ok(JobStatus::ExtractingAudio),
            "transcribing" => Ok(JobStatus::Transcribing),
            "rendering" => Ok(JobStatus::Rendering),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    pub model: String,
    pub source_name: Option<String>,
    pub status: JobStatus,
    pub progress: i64,
    /// Style as JSON
    pub style: String,
    /// Transcript produced by Whisper, as JSON. Never replaced by edits.
    pub transcript: Option<String>,
    /// Current SRT text, edited or generated
    pub srt: Option<String>,
    pub output_path: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Filesystem path of a `sqlite:` URL, without query parameters
fn sqlite_file(database_url: &str) -> Option<&Path> {
    let rest = database_url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(Path::new(path))
}

pub async fn init_db(database_url: &str) -> Result<DbPool, sqlx::Error> {
    if let Some(parent) = sqlite_file(database_url).and_then(Path::parent) {
        std::fs::create_dir_all(parent).ok();
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    MIGRATOR.run(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the schema applied
#[cfg(test)]
pub async fn test_pool() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    MIGRATOR.run(&pool).await.unwrap();
    pool
}

pub async fn insert_job(
    pool: &DbPool,
    id: &str,
    model: &str,
    style: &str,
    source_name: Option<&str>,
) -> Result<Job, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO jobs (id, model, style, source_name, status, progress)
        VALUES (?, ?, ?, ?, 'queued', 0)
        "#,
    )
    .bind(id)
    .bind(model)
    .bind(style)
    .bind(source_name)
    .execute(pool)
    .await?;

    get_job(pool, id).await?.ok_or(sqlx::Error::RowNotFound)
}

pub async fn get_job(pool: &DbPool, id: &str) -> Result<Option<Job>, sqlx::Error> {
    let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(job)
}

pub async fn list_jobs(pool: &DbPool) -> Result<Vec<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY created_at DESC, rowid DESC")
        .fetch_all(pool)
        .await
}

pub async fn update_status(
    pool: &DbPool,
    id: &str,
    status: JobStatus,
    progress: u8,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs SET status = ?, progress = ?, updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(status)
    .bind(progress as i64)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store the Whisper transcript and the SRT generated from it
pub async fn set_transcript(
    pool: &DbPool,
    id: &str,
    transcript: &str,
    srt: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs SET transcript = ?, srt = ?, updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(transcript)
    .bind(srt)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Start a re-render with an edited SRT and the style to draw it with.
///
/// Only a finished job can be claimed; returns false when the job is missing
/// or another pipeline already owns it.
pub async fn begin_regeneration(
    pool: &DbPool,
    id: &str,
    srt: &str,
    style: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET srt = ?, style = ?, status = 'rendering', progress = 0, error = NULL,
            updated_at = datetime('now')
        WHERE id = ? AND status IN ('completed', 'failed')
        "#,
    )
    .bind(srt)
    .bind(style)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_completed(pool: &DbPool, id: &str, output_path: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'completed', progress = 100, output_path = ?, error = NULL,
            updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(output_path)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_failed(pool: &DbPool, id: &str, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs SET status = 'failed', error = ?, updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark every job a previous process left unfinished as failed.
///
/// Run at startup, before any pipeline is spawned.
pub async fn fail_interrupted(pool: &DbPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs SET status = 'failed', error = 'Interrupted by a server restart',
            updated_at = datetime('now')
        WHERE status NOT IN ('completed', 'failed')
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Delete a finished job. Returns false when no finished job had that id.
pub async fn delete_job(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND status IN ('completed', 'failed')")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::ExtractingAudio,
            JobStatus::Transcribing,
            JobStatus::Rendering,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status)
            );
        }
        assert!("done".parse::<JobStatus>().is_err());
        assert!(JobStatus::Rendering.is_running());
        assert!(!JobStatus::Failed.is_running());
    }

    #[test]
    fn test_sqlite_file() {
        assert_eq!(
            sqlite_file("sqlite:data/subtitley.db?mode=rwc"),
            Some(Path::new("data/subtitley.db"))
        );
        assert_eq!(sqlite_file("sqlite://tmp/x.db"), Some(Path::new("tmp/x.db")));
        assert_eq!(sqlite_file("sqlite::memory:"), None);
        assert_eq!(sqlite_file("postgres://localhost"), None);
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let pool = test_pool().await;

        let job = insert_job(&pool, "job-1", "tiny.en", "{}", Some("clip.mp4"))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert_eq!(job.source_name.as_deref(), Some("clip.mp4"));
        assert!(job.transcript.is_none());

        update_status(&pool, "job-1", JobStatus::Transcribing, 10).await.unwrap();
        set_transcript(&pool, "job-1", "{\"segments\":[]}", "1\n").await.unwrap();
        set_completed(&pool, "job-1", "jobs/job-1/output.mp4").await.unwrap();

        let job = get_job(&pool, "job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.srt.as_deref(), Some("1\n"));
        assert_eq!(job.output_path.as_deref(), Some("jobs/job-1/output.mp4"));
    }

    #[tokio::test]
    async fn test_regeneration_resets_state() {
        let pool = test_pool().await;
        insert_job(&pool, "job-1", "tiny.en", "{}", None).await.unwrap();
        set_failed(&pool, "job-1", "boom").await.unwrap();

        let job = get_job(&pool, "job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));

        assert!(begin_regeneration(&pool, "job-1", "edited", "{\"font_size\":30}").await.unwrap());
        let job = get_job(&pool, "job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Rendering);
        assert_eq!(job.progress, 0);
        assert!(job.error.is_none());
        assert_eq!(job.srt.as_deref(), Some("edited"));
        assert_eq!(job.style, "{\"font_size\":30}");

        // The job is rendering now, so a second claim fails
        assert!(!begin_regeneration(&pool, "job-1", "again", "{}").await.unwrap());
        assert!(!begin_regeneration(&pool, "missing", "again", "{}").await.unwrap());
        let job = get_job(&pool, "job-1").await.unwrap().unwrap();
        assert_eq!(job.srt.as_deref(), Some("edited"));
    }

    #[tokio::test]
    async fn test_fail_interrupted() {
        let pool = test_pool().await;
        insert_job(&pool, "queued", "tiny.en", "{}", None).await.unwrap();
        insert_job(&pool, "busy", "tiny.en", "{}", None).await.unwrap();
        update_status(&pool, "busy", JobStatus::Transcribing, 10).await.unwrap();
        insert_job(&pool, "done", "tiny.en", "{}", None).await.unwrap();
        set_completed(&pool, "done", "out.mp4").await.unwrap();

        assert_eq!(fail_interrupted(&pool).await.unwrap(), 2);

        let busy = get_job(&pool, "busy").await.unwrap().unwrap();
        assert_eq!(busy.status, JobStatus::Failed);
        assert!(busy.error.is_some());
        let done = get_job(&pool, "done").await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.error.is_none());

        assert_eq!(fail_interrupted(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let pool = test_pool().await;
        insert_job(&pool, "a", "tiny.en", "{}", None).await.unwrap();
        insert_job(&pool, "b", "base.en", "{}", None).await.unwrap();

        let jobs = list_jobs(&pool).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "b");

        // Still queued
        assert!(!delete_job(&pool, "a").await.unwrap());
        set_completed(&pool, "a", "out.mp4").await.unwrap();
        assert!(delete_job(&pool, "a").await.unwrap());
        assert!(!delete_job(&pool, "a").await.unwrap());
        assert!(get_job(&pool, "a").await.unwrap().is_none());
        assert_eq!(list_jobs(&pool).await.unwrap().len(), 1);
    }
}
