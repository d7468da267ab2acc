//! Burning subtitles into a video.
//!
//! One ffmpeg process decodes the input to raw RGBA frames on stdout, the
//! overlay is drawn in place, and a second ffmpeg process encodes the frames
//! from stdin while copying the audio from the original file.

use crate::media::{FfmpegTools, MediaError, StderrDrain, VideoInfo, check_status};
use crate::render::draw::draw_layout;
use crate::render::font::SubtitleFont;
use crate::render::layout::layout_frame;
use crate::render::style::ResolvedStyle;
use crate::transcription::Transcript;
use image::RgbaImage;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum VideoError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("IO error while piping frames: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid frame size {width}x{height}")]
    FrameSize { width: u32, height: u32 },
}

/// Reports whole percents, once per change
#[derive(Debug)]
pub struct ProgressTracker {
    total_frames: u64,
    last: Option<u8>,
}

impl ProgressTracker {
    pub fn new(total_frames: u64) -> Self {
        Self {
            total_frames: total_frames.max(1),
            last: None,
        }
    }

    /// New percentage after `frames_done` frames, if it changed
    pub fn update(&mut self, frames_done: u64) -> Option<u8> {
        let percent = ((frames_done * 100) / self.total_frames).min(100) as u8;
        if self.last == Some(percent) {
            return None;
        }
        self.last = Some(percent);
        Some(percent)
    }

    /// 100, unless it was already reported
    pub fn finish(&mut self) -> Option<u8> {
        if self.last == Some(100) {
            return None;
        }
        self.last = Some(100);
        Some(100)
    }
}

fn estimated_frames(info: &VideoInfo) -> u64 {
    (info.duration_secs * info.fps_or_default()).ceil().max(1.0) as u64
}

fn decoder_args(input: &Path, fps: f64) -> Vec<String> {
    vec![
        "-i".to_string(),
        input.display().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-r".to_string(),
        format!("{fps}"),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-".to_string(),
    ]
}

fn encoder_args(input: &Path, output: &Path, info: &VideoInfo) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", info.width, info.height),
        "-r".to_string(),
        format!("{}", info.fps_or_default()),
        "-i".to_string(),
        "-".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0?".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        // libx264 with yuv420p needs even dimensions
        "-vf".to_string(),
        "scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ];
    if info.has_audio {
        args.extend(["-c:a".to_string(), "aac".to_string()]);
    }
    args.extend(["-shortest".to_string(), output.display().to_string()]);
    args
}

/// Fill `buf` with one frame; `Ok(false)` on a clean end of stream
fn read_frame(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Re-encode `input` into `output` with the transcript drawn on every frame
/// that falls inside a segment.
///
/// Blocking; run it on a blocking thread.
#[allow(clippy::too_many_arguments)]
pub fn render_video(
    tools: &FfmpegTools,
    input: &Path,
    output: &Path,
    info: &VideoInfo,
    transcript: &Transcript,
    style: &ResolvedStyle,
    font: &SubtitleFont,
    mut on_progress: impl FnMut(u8),
) -> Result<(), VideoError> {
    let (width, height) = (info.width, info.height);
    if width == 0 || height == 0 {
        return Err(VideoError::FrameSize { width, height });
    }
    let fps = info.fps_or_default();

    info!(
        "Rendering {}x{} at {:.3} fps into {:?} ({} segments)",
        width,
        height,
        fps,
        output,
        transcript.segments.len()
    );

    let mut decoder = tools
        .ffmpeg_command()
        .args(decoder_args(input, fps))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut encoder = match Command::new(tools.ffmpeg())
        .args(["-hide_banner", "-v", "error"])
        .args(encoder_args(input, output, info))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let _ = decoder.kill();
            let _ = decoder.wait();
            return Err(e.into());
        }
    };

    // Both children are drained so a flood of decode warnings cannot stall them
    let decoder_log = decoder.stderr.take().map(StderrDrain::spawn);
    let encoder_log = encoder.stderr.take().map(StderrDrain::spawn);

    let (Some(mut frames_in), Some(mut frames_out)) = (decoder.stdout.take(), encoder.stdin.take()) else {
        let _ = decoder.kill();
        let _ = encoder.kill();
        return Err(VideoError::Io(std::io::Error::other("ffmpeg pipes unavailable")));
    };

    let mut progress = ProgressTracker::new(estimated_frames(info));
    let mut frame = RgbaImage::new(width, height);
    let mut index: u64 = 0;
    let mut read_error = None;
    let mut encoder_closed = false;

    loop {
        match read_frame(&mut frames_in, &mut frame) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                read_error = Some(e);
                break;
            }
        }

        let t = index as f64 / fps;
        if let Some(layout) = layout_frame(transcript, t, style, font, width, height) {
            draw_layout(&mut frame, &layout, style, font);
        }

        if let Err(e) = frames_out.write_all(frame.as_raw()) {
            // -shortest lets the encoder stop before the decoder runs dry
            debug!("Encoder closed its input at frame {}: {}", index, e);
            encoder_closed = true;
            break;
        }

        index += 1;
        if let Some(percent) = progress.update(index) {
            on_progress(percent);
        }
    }

    drop(frames_in);
    drop(frames_out);
    if encoder_closed {
        let _ = decoder.kill();
    }

    let decoded = decoder.wait()?;
    let encoded = encoder.wait()?;
    let decoder_tail = decoder_log.map(StderrDrain::finish).unwrap_or_default();
    let encoder_tail = encoder_log.map(StderrDrain::finish).unwrap_or_default();
    check_status("ffmpeg", encoded, &encoder_tail)?;
    if !encoder_closed {
        check_status("ffmpeg", decoded, &decoder_tail)?;
    }
    if let Some(e) = read_error {
        return Err(e.into());
    }

    if let Some(percent) = progress.finish() {
        on_progress(percent);
    }

    info!("Rendered {} frames into {:?}", index, output);
    Ok(())
}
