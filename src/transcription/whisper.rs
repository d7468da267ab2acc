//! Whisper.cpp integration for local speech-to-text.
//!
//! Uses the whisper-rs crate which provides Rust bindings to whisper.cpp.
//! Segments come back with word-level timings assembled from token
//! timestamps.

use super::transcript::{TranscriptSegment, TranscriptWord};
use crate::config::BuildVariant;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Whisper's required sample rate
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Allow max 2 consecutive identical segments
const MAX_REPEATS: usize = 2;

#[derive(Error, Debug)]
pub enum WhisperError {
    #[error("Whisper model not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("Failed to initialize Whisper: {0}")]
    Init(String),
    #[error("Transcription failed: {0}")]
    Transcription(String),
}

/// Whisper inference configuration
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Language code (e.g., "en"); None for auto-detection
    pub language: Option<String>,
    /// Enable translation to English
    pub translate: bool,
    /// Number of threads for processing
    pub n_threads: i32,
    /// Offload inference to the GPU
    pub use_gpu: bool,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            language: Some("en".to_string()),
            translate: false,
            n_threads: std::thread::available_parallelism()
                .map(|p| p.get() as i32)
                .unwrap_or(4),
            use_gpu: BuildVariant::current().is_gpu(),
        }
    }
}

impl WhisperConfig {
    /// `"auto"` (or an empty string) switches to language detection
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = match language.trim() {
            "" | "auto" => None,
            lang => Some(lang.to_lowercase()),
        };
        self
    }

    pub fn with_threads(mut self, n: i32) -> Self {
        self.n_threads = n.max(1);
        self
    }
}

/// Anything that turns 16kHz mono samples into timed segments
pub trait SpeechEngine: Send + Sync {
    fn transcribe(&self, model_path: &Path, samples: &[f32]) -> Result<Transcribed, WhisperError>;
}

/// Engine output
#[derive(Debug, Clone)]
pub struct Transcribed {
    pub segments: Vec<TranscriptSegment>,
    pub language: Option<String>,
}

/// Whisper engine with a cache of loaded model contexts
pub struct WhisperEngine {
    config: WhisperConfig,
    contexts: Mutex<HashMap<PathBuf, Arc<WhisperContext>>>,
}

impl WhisperEngine {
    pub fn new(config: WhisperConfig) -> Self {
        info!(
            "Whisper engine: {} threads, gpu={}, language={:?}",
            config.n_threads, config.use_gpu, config.language
        );
        Self {
            config,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    fn context(&self, model_path: &Path) -> Result<Arc<WhisperContext>, WhisperError> {
        let mut contexts = self
            .contexts
            .lock()
            .map_err(|_| WhisperError::Init("model cache poisoned".to_string()))?;

        if let Some(ctx) = contexts.get(model_path) {
            return Ok(ctx.clone());
        }

        if !model_path.exists() {
            return Err(WhisperError::ModelNotFound(model_path.to_path_buf()));
        }

        info!("Loading Whisper model from {:?}", model_path);

        let path_str = model_path
            .to_str()
            .ok_or_else(|| WhisperError::Init(format!("Non UTF-8 model path: {:?}", model_path)))?;

        let mut params = WhisperContextParameters::default();
        params.use_gpu(self.config.use_gpu);

        let ctx = WhisperContext::new_with_params(path_str, params)
            .map_err(|e| WhisperError::Init(format!("Failed to load model: {}", e)))?;
        let ctx = Arc::new(ctx);
        contexts.insert(model_path.to_path_buf(), ctx.clone());

        Ok(ctx)
    }

    fn full_params(&self) -> FullParams<'_, '_> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        params.set_n_threads(self.config.n_threads);

        // Word timings are built from token timestamps
        params.set_token_timestamps(true);

        // ===== HALLUCINATION PREVENTION =====
        params.set_no_speech_thold(0.6);
        params.set_entropy_thold(2.4);
        params.set_logprob_thold(-1.0);
        params.set_temperature(0.0);
        params.set_temperature_inc(0.2);
        params.set_suppress_non_speech_tokens(true);

        match &self.config.language {
            Some(lang) => params.set_language(Some(lang)),
            None => params.set_language(Some("auto")),
        }
        params.set_translate(self.config.translate);

        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_print_special(false);

        params
    }
}

impl SpeechEngine for WhisperEngine {
    fn transcribe(&self, model_path: &Path, samples: &[f32]) -> Result<Transcribed, WhisperError> {
        let start_time = std::time::Instant::now();
        let audio_secs = samples.len() as f32 / WHISPER_SAMPLE_RATE as f32;

        info!("Transcribing {:.2}s of audio", audio_secs);

        let ctx = self.context(model_path)?;
        let mut state = ctx
            .create_state()
            .map_err(|e| WhisperError::Transcription(format!("Failed to create state: {}", e)))?;

        state
            .full(self.full_params(), samples)
            .map_err(|e| WhisperError::Transcription(format!("Inference failed: {}", e)))?;

        let num_segments = state
            .full_n_segments()
            .map_err(|e| WhisperError::Transcription(format!("Failed to get segments: {}", e)))?;

        let mut raw_segments = Vec::new();
        for i in 0..num_segments {
            let start_ts = state
                .full_get_segment_t0(i)
                .map_err(|e| WhisperError::Transcription(format!("Failed to get start time: {}", e)))?;
            let end_ts = state
                .full_get_segment_t1(i)
                .map_err(|e| WhisperError::Transcription(format!("Failed to get end time: {}", e)))?;
            let n_tokens = state
                .full_n_tokens(i)
                .map_err(|e| WhisperError::Transcription(format!("Failed to get tokens: {}", e)))?;

            let mut tokens = Vec::with_capacity(n_tokens.max(0) as usize);
            for j in 0..n_tokens {
                let text = match state.full_get_token_text(i, j) {
                    Ok(text) => text,
                    // Partial UTF-8 sequences inside a multi-token character
                    Err(_) => continue,
                };
                let data = state
                    .full_get_token_data(i, j)
                    .map_err(|e| WhisperError::Transcription(format!("Failed to get token data: {}", e)))?;
                tokens.push(RawToken {
                    text,
                    start: centis_to_secs(data.t0),
                    end: centis_to_secs(data.t1),
                    probability: data.p,
                });
            }

            raw_segments.push(RawSegment {
                start: centis_to_secs(start_ts),
                end: centis_to_secs(end_ts),
                tokens,
            });
        }

        let language = state
            .full_lang_id_from_state()
            .ok()
            .and_then(|id| whisper_rs::get_lang_str(id).map(|s| s.to_string()));

        let segments = build_segments(raw_segments);

        let elapsed = start_time.elapsed();
        info!(
            "Transcribed in {:.1}s ({:.1}x realtime): {} segments ({} filtered)",
            elapsed.as_secs_f32(),
            audio_secs / elapsed.as_secs_f32().max(f32::EPSILON),
            segments.len(),
            num_segments as usize - segments.len().min(num_segments as usize)
        );

        Ok(Transcribed { segments, language })
    }
}

/// Timestamps are in centiseconds (1/100 second)
fn centis_to_secs(ts: i64) -> f64 {
    ts.max(0) as f64 / 100.0
}

/// A decoded token with its timing
#[derive(Debug, Clone)]
pub struct RawToken {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub probability: f32,
}

#[derive(Debug, Clone)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub tokens: Vec<RawToken>,
}

fn is_special_token(text: &str) -> bool {
    let t = text.trim();
    (t.starts_with("[_") && t.ends_with(']')) || (t.starts_with("<|") && t.ends_with("|>"))
}

/// Merge sub-word tokens into words.
///
/// A token with leading whitespace starts a new word; anything else
/// (punctuation, word pieces) is glued onto the current word.
pub fn group_tokens_into_words(tokens: &[RawToken]) -> Vec<TranscriptWord> {
    struct Pending {
        text: String,
        start: f64,
        end: f64,
        prob_sum: f32,
        count: usize,
    }

    fn finish(pending: Pending, words: &mut Vec<TranscriptWord>) {
        let text = pending.text.trim();
        if text.is_empty() {
            return;
        }
        words.push(TranscriptWord {
            text: text.to_string(),
            start: pending.start,
            end: pending.end.max(pending.start),
            confidence: Some(pending.prob_sum / pending.count as f32),
        });
    }

    let mut words = Vec::new();
    let mut current: Option<Pending> = None;

    for token in tokens {
        if is_special_token(&token.text) || token.text.is_empty() {
            continue;
        }

        let starts_word = token.text.starts_with(char::is_whitespace);
        match current.as_mut() {
            Some(pending) if !starts_word => {
                pending.text.push_str(&token.text);
                pending.end = token.end;
                pending.prob_sum += token.probability;
                pending.count += 1;
            }
            _ => {
                if let Some(done) = current.take() {
                    finish(done, &mut words);
                }
                current = Some(Pending {
                    text: token.text.clone(),
                    start: token.start,
                    end: token.end,
                    prob_sum: token.probability,
                    count: 1,
                });
            }
        }
    }

    if let Some(done) = current {
        finish(done, &mut words);
    }

    words
}

/// Turn raw segments into transcript segments, dropping empty ones and
/// runs of repeated text (a hallucination symptom).
pub fn build_segments(raw: Vec<RawSegment>) -> Vec<TranscriptSegment> {
    let mut segments = Vec::new();
    let mut last_text: Option<String> = None;
    let mut repeat_count = 0;

    for seg in raw {
        let words = group_tokens_into_words(&seg.tokens);
        if words.is_empty() {
            continue;
        }

        let text = words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
        if last_text.as_deref() == Some(text.as_str()) {
            repeat_count += 1;
            if repeat_count >= MAX_REPEATS {
                continue;
            }
        } else {
            repeat_count = 0;
        }
        last_text = Some(text);

        segments.push(TranscriptSegment {
            id: segments.len(),
            start: seg.start,
            end: seg.end,
            words,
        });
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(text: &str, start: f64, end: f64) -> RawToken {
        RawToken {
            text: text.to_string(),
            start,
            end,
            probability: 0.5,
        }
    }

    #[test]
    fn test_whisper_config_default() {
        let config = WhisperConfig::default();
        assert_eq!(config.language, Some("en".to_string()));
        assert!(!config.translate);
        assert_eq!(config.use_gpu, cfg!(feature = "cuda"));
    }

    #[test]
    fn test_whisper_config_builder() {
        let config = WhisperConfig::default().with_language("auto").with_threads(0);
        assert_eq!(config.language, None);
        assert_eq!(config.n_threads, 1);

        let config = WhisperConfig::default().with_language("DE");
        assert_eq!(config.language.as_deref(), Some("de"));
    }

    #[test]
    fn test_tokens_group_into_words() {
        let tokens = vec![
            tok("[_BEG_]", 0.0, 0.0),
            tok(" Hel", 0.0, 0.2),
            tok("lo", 0.2, 0.4),
            tok(",", 0.4, 0.45),
            tok(" world", 0.5, 1.0),
            tok("<|endoftext|>", 1.0, 1.0),
        ];
        let words = group_tokens_into_words(&tokens);

        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "Hello,");
        assert_eq!(words[0].start, 0.0);
        assert_eq!(words[0].end, 0.45);
        assert_eq!(words[1].text, "world");
        assert_eq!(words[1].confidence, Some(0.5));
    }

    #[test]
    fn test_first_token_without_space_starts_word() {
        let words = group_tokens_into_words(&[tok("Hi", 0.0, 0.3), tok(" there", 0.3, 0.6)]);
        let texts: Vec<_> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["Hi", "there"]);
    }

    #[test]
    fn test_repeated_segments_are_filtered() {
        let seg = |s: f64| RawSegment {
            start: s,
            end: s + 1.0,
            tokens: vec![tok(" again", s, s + 1.0)],
        };
        let raw = vec![
            seg(0.0),
            seg(1.0),
            seg(2.0),
            seg(3.0),
            RawSegment {
                start: 4.0,
                end: 5.0,
                tokens: vec![],
            },
        ];
        let segments = build_segments(raw);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].id, 1);
        assert_eq!(segments[1].start, 1.0);
    }

    #[test]
    fn test_centiseconds_conversion() {
        assert_eq!(centis_to_secs(150), 1.5);
        assert_eq!(centis_to_secs(-3), 0.0);
    }
}
