use futures_util::StreamExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

/// Available Whisper models (English-only variants)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WhisperModel {
    TinyEn,
    BaseEn,
    SmallEn,
    MediumEn,
}

impl WhisperModel {
    pub const ALL: [WhisperModel; 4] = [
        WhisperModel::TinyEn,
        WhisperModel::BaseEn,
        WhisperModel::SmallEn,
        WhisperModel::MediumEn,
    ];

    /// Get the Hugging Face URL for this model
    pub fn hf_url(&self) -> String {
        format!(
            "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{}",
            self.filename()
        )
    }

    /// Get the filename for this model
    pub fn filename(&self) -> &'static str {
        match self {
            WhisperModel::TinyEn => "ggml-tiny.en.bin",
            WhisperModel::BaseEn => "ggml-base.en.bin",
            WhisperModel::SmallEn => "ggml-small.en.bin",
            WhisperModel::MediumEn => "ggml-medium.en.bin",
        }
    }

    /// Get approximate model size in MB
    pub fn size_mb(&self) -> u64 {
        match self {
            WhisperModel::TinyEn => 75,
            WhisperModel::BaseEn => 142,
            WhisperModel::SmallEn => 466,
            WhisperModel::MediumEn => 1500,
        }
    }

    /// Rough accuracy/speed guidance shown to clients
    pub fn description(&self) -> &'static str {
        match self {
            WhisperModel::TinyEn => "fastest, lowest accuracy",
            WhisperModel::BaseEn => "fast, fair accuracy",
            WhisperModel::SmallEn => "balanced, about 80% subtitle accuracy",
            WhisperModel::MediumEn => "slowest (needs >6GB RAM), about 95% subtitle accuracy",
        }
    }
}

impl std::fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhisperModel::TinyEn => write!(f, "tiny.en"),
            WhisperModel::BaseEn => write!(f, "base.en"),
            WhisperModel::SmallEn => write!(f, "small.en"),
            WhisperModel::MediumEn => write!(f, "medium.en"),
        }
    }
}

impl std::str::FromStr for WhisperModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tiny" | "tiny.en" => Ok(WhisperModel::TinyEn),
            "base" | "base.en" => Ok(WhisperModel::BaseEn),
            "small" | "small.en" => Ok(WhisperModel::SmallEn),
            "medium" | "medium.en" => Ok(WhisperModel::MediumEn),
            _ => Err(format!(
                "Unknown model: {}. Use tiny.en, base.en, small.en or medium.en",
                s
            )),
        }
    }
}

impl Serialize for WhisperModel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to download model: {0}")]
    Download(String),
    #[error("Model {0} is already being downloaded")]
    InProgress(WhisperModel),
    #[error("Model {0} is not downloaded")]
    NotDownloaded(WhisperModel),
}

/// Download state of a model, as reported to clients
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: WhisperModel,
    pub size_mb: u64,
    pub description: &'static str,
    pub downloaded: bool,
    pub downloading: bool,
    /// Why the most recent download failed; cleared when a new one starts
    pub last_error: Option<String>,
}

/// On-disk model registry with Hugging Face downloads
pub struct ModelStore {
    dir: PathBuf,
    hf_token: Option<String>,
    client: reqwest::Client,
    in_flight: Mutex<HashSet<WhisperModel>>,
    failures: Mutex<HashMap<WhisperModel, String>>,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>, hf_token: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            hf_token: hf_token.filter(|t| !t.trim().is_empty()),
            client: reqwest::Client::new(),
            in_flight: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the path to a specific model file
    pub fn path(&self, model: WhisperModel) -> PathBuf {
        self.dir.join(model.filename())
    }

    /// Check if a model is already downloaded
    pub fn is_downloaded(&self, model: WhisperModel) -> bool {
        let path = self.path(model);

        // Check if file size is reasonable (at least 50% of expected)
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => {
                let expected_bytes = model.size_mb() * 1024 * 1024;
                metadata.len() >= expected_bytes / 2
            }
            _ => false,
        }
    }

    pub fn is_downloading(&self, model: WhisperModel) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(&model))
            .unwrap_or(false)
    }

    /// Path of a downloaded model, or an error telling the caller to fetch it first
    pub fn require(&self, model: WhisperModel) -> Result<PathBuf, ModelError> {
        if self.is_downloaded(model) {
            Ok(self.path(model))
        } else {
            Err(ModelError::NotDownloaded(model))
        }
    }

    pub fn list(&self) -> Vec<ModelInfo> {
        WhisperModel::ALL
            .iter()
            .map(|&model| ModelInfo {
                name: model,
                size_mb: model.size_mb(),
                description: model.description(),
                downloaded: self.is_downloaded(model),
                downloading: self.is_downloading(model),
                last_error: self.last_error(model),
            })
            .collect()
    }

    /// Mark a download as started; fails if one is already running
    pub fn begin_download(&self, model: WhisperModel) -> Result<(), ModelError> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| ModelError::Download("download registry poisoned".to_string()))?;
        if !set.insert(model) {
            return Err(ModelError::InProgress(model));
        }
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(&model);
        }
        Ok(())
    }

    /// Error message of the last failed download of `model`
    pub fn last_error(&self, model: WhisperModel) -> Option<String> {
        self.failures
            .lock()
            .ok()
            .and_then(|failures| failures.get(&model).cloned())
    }

    fn end_download(&self, model: WhisperModel, error: Option<String>) {
        if let (Some(message), Ok(mut failures)) = (error, self.failures.lock()) {
            failures.insert(model, message);
        }
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&model);
        }
    }

    /// Download a Whisper model from Hugging Face.
    ///
    /// The caller must have called [`ModelStore::begin_download`] first.
    pub async fn download(&self, model: WhisperModel) -> Result<PathBuf, ModelError> {
        let result = self.fetch(model).await;
        if let Err(e) = &result {
            warn!("Download of {} failed: {}", model, e);
        }
        self.end_download(model, result.as_ref().err().map(ToString::to_string));
        result
    }

    async fn fetch(&self, model: WhisperModel) -> Result<PathBuf, ModelError> {
        let path = self.path(model);

        if self.is_downloaded(model) {
            info!("Model {} already downloaded at {:?}", model, path);
            return Ok(path);
        }

        fs::create_dir_all(&self.dir)?;

        info!("Downloading Whisper {} model (~{}MB)...", model, model.size_mb());

        let url = model.hf_url();
        let mut request = self.client.get(&url).header("User-Agent", "subtitley");
        if let Some(token) = &self.hf_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ModelError::Download(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ModelError::Download(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let total_size = response.content_length().unwrap_or(0);

        let pb = indicatif::ProgressBar::new(total_size);
        if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }

        let temp_path = path.with_extension("bin.tmp");
        let mut file = File::create(&temp_path)?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(ModelError::Download(format!("Failed to read response: {}", e)));
                }
            };
            file.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }
        file.flush()?;
        drop(file);

        pb.finish_with_message("Download complete");

        fs::rename(&temp_path, &path)?;

        info!("Model downloaded to {:?} ({} bytes)", path, downloaded);

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_parsing() {
        assert_eq!("tiny".parse::<WhisperModel>().unwrap(), WhisperModel::TinyEn);
        assert_eq!("SMALL.EN".parse::<WhisperModel>().unwrap(), WhisperModel::SmallEn);
        assert!("large".parse::<WhisperModel>().is_err());
        assert_eq!(WhisperModel::MediumEn.to_string(), "medium.en");
    }

    #[test]
    fn test_model_urls() {
        assert!(WhisperModel::BaseEn.hf_url().ends_with("/ggml-base.en.bin"));
    }

    #[test]
    fn test_download_state_uses_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path(), None);
        let model = WhisperModel::TinyEn;

        assert!(!store.is_downloaded(model));
        assert!(matches!(store.require(model), Err(ModelError::NotDownloaded(_))));

        let file = File::create(store.path(model)).unwrap();
        file.set_len(1024).unwrap();
        assert!(!store.is_downloaded(model), "truncated file must not count");

        file.set_len(model.size_mb() * 1024 * 1024).unwrap();
        assert!(store.is_downloaded(model));
        assert_eq!(store.require(model).unwrap(), store.path(model));

        let listed = store.list();
        assert_eq!(listed.len(), 4);
        assert!(listed[0].downloaded);
        assert!(!listed[1].downloaded);
    }

    #[test]
    fn test_concurrent_download_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path(), Some("  ".to_string()));
        assert!(store.hf_token.is_none());

        store.begin_download(WhisperModel::SmallEn).unwrap();
        assert!(store.is_downloading(WhisperModel::SmallEn));
        assert!(matches!(
            store.begin_download(WhisperModel::SmallEn),
            Err(ModelError::InProgress(WhisperModel::SmallEn))
        ));

        store.end_download(WhisperModel::SmallEn, None);
        assert!(!store.is_downloading(WhisperModel::SmallEn));
        assert!(store.last_error(WhisperModel::SmallEn).is_none());
    }

    #[test]
    fn test_failed_download_is_reported_until_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path(), None);
        let model = WhisperModel::BaseEn;

        store.begin_download(model).unwrap();
        store.end_download(model, Some("HTTP 401 Unauthorized".to_string()));

        let info = &store.list()[1];
        assert_eq!(info.name, model);
        assert!(!info.downloading);
        assert!(!info.downloaded);
        assert_eq!(info.last_error.as_deref(), Some("HTTP 401 Unauthorized"));

        store.begin_download(model).unwrap();
        assert!(store.last_error(model).is_none());
        assert!(store.list()[1].downloading);
    }

    #[test]
    fn test_model_info_serializes_names() {
        let json = serde_json::to_value(ModelInfo {
            name: WhisperModel::BaseEn,
            size_mb: 142,
            description: "x",
            downloaded: false,
            downloading: false,
            last_error: None,
        })
        .unwrap();
        assert_eq!(json["name"], "base.en");
    }
}
