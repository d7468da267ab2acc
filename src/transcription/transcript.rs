//! Transcript types and export formatters.
//!
//! Supports JSON, SRT, VTT and plain text output formats.

use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use std::io;
use std::path::Path;

/// A word with timing information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    /// The word text, without surrounding whitespace
    pub text: String,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Confidence score (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl TranscriptWord {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            confidence: None,
        }
    }

    /// Whether this word is being spoken at `t` (inclusive on both ends)
    pub fn is_active_at(&self, t: f64) -> bool {
        self.start <= t && t <= self.end
    }
}

/// A segment of transcribed speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Segment ID
    pub id: usize,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Individual words with their own timings
    pub words: Vec<TranscriptWord>,
}

impl TranscriptSegment {
    /// Segment text, words joined by a single space
    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.trim())
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t <= self.end
    }

    /// Index of the first word active at `t`
    pub fn active_word(&self, t: f64) -> Option<usize> {
        self.words.iter().position(|w| w.is_active_at(t))
    }
}

/// Complete transcript for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub metadata: TranscriptMetadata,
    pub segments: Vec<TranscriptSegment>,
}

/// Metadata about the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMetadata {
    /// Job ID or source filename
    pub source: String,
    /// Creation time (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Total audio duration in seconds
    pub duration_secs: f64,
    /// Model used for transcription
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Language detected/used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Transcript {
    pub fn new(source: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            metadata: TranscriptMetadata {
                source: source.into(),
                created_at: Some(chrono::Utc::now().to_rfc3339()),
                duration_secs,
                model: None,
                language: None,
            },
            segments: Vec::new(),
        }
    }

    /// Add a segment to the transcript
    pub fn add_segment(&mut self, segment: TranscriptSegment) {
        self.segments.push(segment);
    }

    /// First segment covering `t`
    pub fn segment_at(&self, t: f64) -> Option<&TranscriptSegment> {
        self.segments.iter().find(|s| s.contains(t))
    }

    /// Get full text (all segments concatenated)
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn word_count(&self) -> usize {
        self.segments.iter().map(|s| s.words.len()).sum()
    }

    /// Export to the specified format
    pub fn export(&self, format: ExportFormat) -> String {
        match format {
            ExportFormat::Json => self.to_json(),
            ExportFormat::JsonPretty => self.to_json_pretty(),
            ExportFormat::Srt => self.to_srt(),
            ExportFormat::Vtt => self.to_vtt(),
            ExportFormat::Text => self.to_text(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Export to SRT format.
    ///
    /// Cue numbers follow the segment position, so a segment with no text
    /// leaves a gap in the numbering instead of shifting later cues. Edited
    /// SRT files are mapped back onto segments through these numbers.
    pub fn to_srt(&self) -> String {
        let mut output = String::new();

        for (i, segment) in self.segments.iter().enumerate() {
            let text = segment.text();
            if text.is_empty() {
                continue;
            }
            let _ = writeln!(output, "{}", i + 1);
            let _ = writeln!(
                output,
                "{} --> {}",
                format_srt_time(segment.start),
                format_srt_time(segment.end)
            );
            let _ = writeln!(output, "{}", text);
            let _ = writeln!(output);
        }

        output
    }

    /// Export to WebVTT format
    pub fn to_vtt(&self) -> String {
        let mut output = String::from("WEBVTT\n\n");

        for (i, segment) in self.segments.iter().enumerate() {
            let text = segment.text();
            if text.is_empty() {
                continue;
            }
            let _ = writeln!(output, "{}", i + 1);
            let _ = writeln!(
                output,
                "{} --> {}",
                format_vtt_time(segment.start),
                format_vtt_time(segment.end)
            );
            let _ = writeln!(output, "{}", text);
            let _ = writeln!(output);
        }

        output
    }

    /// Export to plain text with timestamps
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        for segment in &self.segments {
            let text = segment.text();
            if text.is_empty() {
                continue;
            }
            let _ = writeln!(output, "[{}] {}", format_timestamp(segment.start), text);
        }

        output
    }

    /// Save to file
    pub fn save_to_file(&self, path: &Path, format: ExportFormat) -> io::Result<()> {
        std::fs::write(path, self.export(format))
    }
}

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// SubRip subtitle format
    Srt,
    /// WebVTT subtitle format
    Vtt,
    /// Plain text with timestamps
    Text,
}

impl ExportFormat {
    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json | ExportFormat::JsonPretty => "json",
            ExportFormat::Srt => "srt",
            ExportFormat::Vtt => "vtt",
            ExportFormat::Text => "txt",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json | ExportFormat::JsonPretty => "application/json",
            ExportFormat::Srt => "application/x-subrip",
            ExportFormat::Vtt => "text/vtt",
            ExportFormat::Text => "text/plain; charset=utf-8",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "json-pretty" | "json_pretty" => Ok(ExportFormat::JsonPretty),
            "srt" => Ok(ExportFormat::Srt),
            "vtt" | "webvtt" => Ok(ExportFormat::Vtt),
            "txt" | "text" => Ok(ExportFormat::Text),
            _ => Err(format!(
                "Unknown format: {}. Use json, json-pretty, srt, vtt or text",
                s
            )),
        }
    }
}

/// Whole milliseconds in `seconds`, after rounding away float noise at the
/// microsecond level (`1.001` must not become 1000 ms).
fn total_millis(seconds: f64) -> u64 {
    let micros = (seconds.max(0.0) * 1_000_000.0).round() as u64;
    micros / 1000
}

/// Format time for SRT (HH:MM:SS,mmm)
pub fn format_srt_time(seconds: f64) -> String {
    let (hours, mins, secs, ms) = split_time(seconds);
    format!("{:02}:{:02}:{:02},{:03}", hours, mins, secs, ms)
}

/// Format time for VTT (HH:MM:SS.mmm)
pub fn format_vtt_time(seconds: f64) -> String {
    let (hours, mins, secs, ms) = split_time(seconds);
    format!("{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
}

fn split_time(seconds: f64) -> (u64, u64, u64, u64) {
    let total_ms = total_millis(seconds);
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    (total_mins / 60, total_mins % 60, secs, ms)
}

/// Format timestamp for text output (MM:SS)
fn format_timestamp(seconds: f64) -> String {
    let total_secs = seconds.max(0.0) as u64;
    let secs = total_secs % 60;
    let mins = total_secs / 60;

    if mins >= 60 {
        format!("{:02}:{:02}:{:02}", mins / 60, mins % 60, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}
