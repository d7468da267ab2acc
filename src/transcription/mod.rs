//! Transcription module for speech-to-text.
//!
//! Provides integration with whisper.cpp for local STT processing, the
//! transcript model and the SRT round trip used for subtitle editing.

pub mod srt;
pub mod transcript;
pub mod whisper;

pub use srt::{SrtError, apply_srt_edits};
pub use transcript::{ExportFormat, Transcript, TranscriptSegment, TranscriptWord};
pub use whisper::{
    SpeechEngine, Transcribed, WHISPER_SAMPLE_RATE, WhisperConfig, WhisperEngine, WhisperError,
};
