//! Application configuration management.
//!
//! Configuration comes from environment variables (optionally loaded from a
//! `.env` file) and is deserialized with `envy`.

use serde::Deserialize;
use std::path::PathBuf;

/// Which dependency set the binary was built with.
///
/// The `cuda` cargo feature links the CUDA build of whisper.cpp; without it
/// the CPU build is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildVariant {
    Gpu,
    Cpu,
}

impl BuildVariant {
    pub const fn current() -> Self {
        if cfg!(feature = "cuda") {
            BuildVariant::Gpu
        } else {
            BuildVariant::Cpu
        }
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self, BuildVariant::Gpu)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildVariant::Gpu => "gpu",
            BuildVariant::Cpu => "cpu",
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `SERVER_PORT`: HTTP port, defaults to 8501
/// - `DATABASE_URL`: sqlite URL for job records
/// - `MODELS_DIR`: where Whisper models are stored
/// - `WORK_DIR`: per-job working directories
/// - `DEFAULT_MODEL`: model used when a request names none
/// - `HF_TOKEN`: optional Hugging Face token for model downloads
/// - `FONT_PATH`: subtitle font, otherwise a system font is searched
/// - `FFMPEG_PATH` / `FFPROBE_PATH`: override PATH lookup
/// - `WHISPER_LANGUAGE`: language code or `auto`
/// - `WHISPER_THREADS`: inference threads
/// - `MAX_CONCURRENT_JOBS`: pipelines allowed to run at once
/// - `MAX_UPLOAD_MB`: request body limit for uploads
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default)]
    pub hf_token: Option<String>,

    #[serde(default)]
    pub font_path: Option<PathBuf>,

    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    #[serde(default = "default_language")]
    pub whisper_language: String,

    #[serde(default)]
    pub whisper_threads: Option<i32>,

    #[serde(default = "default_max_jobs")]
    pub max_concurrent_jobs: usize,

    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

fn default_port() -> u16 {
    8501
}

fn default_database_url() -> String {
    "sqlite:data/subtitley.db?mode=rwc".to_string()
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("jobs")
}

fn default_model() -> String {
    "tiny.en".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_max_jobs() -> usize {
    1
}

fn default_max_upload_mb() -> usize {
    1024
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is read first if present.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        Self::from_iter(std::env::vars())
    }

    fn from_iter<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_iter(Vec::new()).unwrap();
        assert_eq!(config.server_port, 8501);
        assert_eq!(config.default_model, "tiny.en");
        assert_eq!(config.max_concurrent_jobs, 1);
        assert!(config.hf_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_iter(vec![
            ("SERVER_PORT".to_string(), "9000".to_string()),
            ("HF_TOKEN".to_string(), "hf_abc".to_string()),
            ("WHISPER_THREADS".to_string(), "2".to_string()),
        ])
        .unwrap();
        assert_eq!(config.server_port, 9000);
        assert_eq!(config.hf_token.as_deref(), Some("hf_abc"));
        assert_eq!(config.whisper_threads, Some(2));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let result = Config::from_iter(vec![("SERVER_PORT".to_string(), "not-a-port".to_string())]);
        assert!(result.is_err());
    }

    #[test]
    fn test_build_variant_follows_feature() {
        assert_eq!(BuildVariant::current().is_gpu(), cfg!(feature = "cuda"));
        assert!(["gpu", "cpu"].contains(&BuildVariant::current().as_str()));
    }
}
