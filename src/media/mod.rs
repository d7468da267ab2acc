//! ffmpeg / ffprobe integration: locating the tools, probing uploads and
//! extracting the audio track for transcription.

use serde::Deserialize;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info};

/// Frame rate assumed when the container does not report one
pub const DEFAULT_FPS: f64 = 24.0;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("{0} not found; install ffmpeg or set its path in the environment")]
    ToolNotFound(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{tool} failed: {message}")]
    Failed { tool: &'static str, message: String },
    #[error("Failed to parse ffprobe output: {0}")]
    Probe(String),
    #[error("No video stream found in {0:?}")]
    NoVideoStream(PathBuf),
}

/// Stream details needed for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
    pub duration_secs: f64,
    pub has_audio: bool,
}

impl VideoInfo {
    pub fn fps_or_default(&self) -> f64 {
        self.fps.unwrap_or(DEFAULT_FPS)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    #[serde(default)]
    tags: ProbeTags,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

impl ProbeStream {
    /// Display rotation in degrees, from the display matrix or the legacy tag
    fn rotation(&self) -> f64 {
        self.side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0)
    }
}

/// ffmpeg applies the display rotation while decoding, so quarter turns
/// swap the frame dimensions
fn is_quarter_turn(degrees: f64) -> bool {
    let turns = (degrees / 90.0).round() as i64;
    (degrees - turns as f64 * 90.0).abs() < 1.0 && turns.rem_euclid(2) == 1
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse an ffprobe rate such as `30000/1001` or `25`
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.trim().split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };

    (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_probe_output(json: &str, path: &Path) -> Result<VideoInfo, MediaError> {
    let probe: ProbeOutput = serde_json::from_str(json).map_err(|e| MediaError::Probe(e.to_string()))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::NoVideoStream(path.to_path_buf()))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::Probe("video stream has no dimensions".to_string())),
    };
    let (width, height) = if is_quarter_turn(video.rotation()) {
        (height, width)
    } else {
        (width, height)
    };

    let fps = video
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.avg_frame_rate.as_deref().and_then(parse_frame_rate));

    let duration_secs = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .unwrap_or(0.0);

    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(VideoInfo {
        width,
        height,
        fps,
        duration_secs,
        has_audio,
    })
}

fn resolve_tool(name: &'static str, configured: Option<&Path>) -> Result<PathBuf, MediaError> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(_) => Err(MediaError::ToolNotFound(name)),
        None => which::which(name).map_err(|_| MediaError::ToolNotFound(name)),
    }
}

/// Lines of stderr kept for error messages
const STDERR_TAIL_LINES: usize = 5;

fn failure_message(tail: &[String], status: ExitStatus) -> String {
    if tail.is_empty() {
        format!("exited with {}", status)
    } else {
        tail.join("\n")
    }
}

/// Last few lines of a failed command's stderr
fn stderr_tail(output: &Output) -> Vec<String> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<String> = stderr
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].to_vec()
}

fn check_output(tool: &'static str, output: Output) -> Result<Output, MediaError> {
    check_status(tool, output.status, &stderr_tail(&output))?;
    Ok(output)
}

pub(crate) fn check_status(tool: &'static str, status: ExitStatus, tail: &[String]) -> Result<(), MediaError> {
    if status.success() {
        Ok(())
    } else {
        Err(MediaError::Failed {
            tool,
            message: failure_message(tail, status),
        })
    }
}

/// Reads a child's stderr on its own thread so the child never blocks on a
/// full pipe, keeping only the last few lines.
pub(crate) struct StderrDrain {
    handle: JoinHandle<Vec<String>>,
}

impl StderrDrain {
    pub(crate) fn spawn(stderr: impl Read + Send + 'static) -> Self {
        let handle = thread::spawn(move || {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            for line in BufReader::new(stderr).split(b'\n') {
                let Ok(line) = line else { break };
                let line = String::from_utf8_lossy(&line).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into()
        });
        Self { handle }
    }

    /// Wait for the stream to close and return the kept lines
    pub(crate) fn finish(self) -> Vec<String> {
        self.handle.join().unwrap_or_default()
    }
}

/// Paths of the ffmpeg and ffprobe executables
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegTools {
    /// Use the configured paths, or search `PATH`
    pub fn locate(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Result<Self, MediaError> {
        let tools = Self {
            ffmpeg: resolve_tool("ffmpeg", ffmpeg)?,
            ffprobe: resolve_tool("ffprobe", ffprobe)?,
        };
        info!("Using ffmpeg at {:?}, ffprobe at {:?}", tools.ffmpeg, tools.ffprobe);
        Ok(tools)
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    /// A new ffmpeg command with quiet logging
    pub fn ffmpeg_command(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-nostdin", "-v", "error"]);
        cmd
    }

    /// First line of `ffmpeg -version`
    pub fn version(&self) -> Option<String> {
        let output = Command::new(&self.ffmpeg).arg("-version").output().ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|l| l.trim().to_string())
    }

    pub fn probe(&self, path: &Path) -> Result<VideoInfo, MediaError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .output()?;
        let output = check_output("ffprobe", output)?;

        let info = parse_probe_output(&String::from_utf8_lossy(&output.stdout), path)?;
        debug!("Probed {:?}: {:?}", path, info);
        Ok(info)
    }

    /// Write the audio track as mono 16kHz 16-bit PCM WAV
    pub fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        info!("Extracting audio from {:?}", input);

        let result = self
            .ffmpeg_command()
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-vn", "-ac", "1", "-ar", "16000", "-c:a", "pcm_s16le"])
            .arg(output)
            .output()?;
        check_output("ffmpeg", result)?;

        info!("Audio written to {:?}", output);
        Ok(())
    }
}
