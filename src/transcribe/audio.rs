use crate::transcription::WHISPER_SAMPLE_RATE;
use hound::{SampleFormat, WavReader};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to read WAV file: {0}")]
    Wav(#[from] hound::Error),
    #[error("Expected {expected}Hz audio, got {actual}Hz")]
    SampleRate { expected: u32, actual: u32 },
    #[error("Unsupported WAV sample format: {0}")]
    Format(String),
    #[error("No audio data found")]
    NoAudioData,
}

pub fn stereo_to_mono(stereo: &[f32]) -> Vec<f32> {
    stereo
        .chunks(2)
        .map(|chunk| {
            if chunk.len() == 2 {
                (chunk[0] + chunk[1]) / 2.0
            } else {
                chunk[0]
            }
        })
        .collect()
}

/// Load a 16kHz WAV file as mono samples normalized to [-1.0, 1.0]
pub fn load_wav_samples(path: &Path) -> Result<Vec<f32>, AudioError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_rate != WHISPER_SAMPLE_RATE {
        return Err(AudioError::SampleRate {
            expected: WHISPER_SAMPLE_RATE,
            actual: spec.sample_rate,
        });
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 2_147_483_648.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (format, bits) => {
            return Err(AudioError::Format(format!("{:?} {}-bit", format, bits)));
        }
    };

    let samples = match spec.channels {
        1 => interleaved,
        2 => stereo_to_mono(&interleaved),
        n => {
            return Err(AudioError::Format(format!("{} channels", n)));
        }
    };

    if samples.is_empty() {
        return Err(AudioError::NoAudioData);
    }

    info!(
        "Loaded {} samples at 16kHz ({:.1}s) from {:?}",
        samples.len(),
        samples.len() as f32 / WHISPER_SAMPLE_RATE as f32,
        path
    );

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_stereo_to_mono() {
        assert_eq!(stereo_to_mono(&[0.5, 0.25, -1.0, 1.0, 0.75]), vec![0.375, 0.0, 0.75]);
    }

    #[test]
    fn test_load_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.wav");
        write_wav(&path, 16000, 1, &[0, 16384, -32768]);

        let samples = load_wav_samples(&path).unwrap();
        assert_eq!(samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_load_stereo_wav_downmixes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.wav");
        write_wav(&path, 16000, 2, &[16384, 0, -16384, -16384]);

        let samples = load_wav_samples(&path).unwrap();
        assert_eq!(samples, vec![0.25, -0.5]);
    }

    #[test]
    fn test_wrong_sample_rate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.wav");
        write_wav(&path, 48000, 1, &[1, 2, 3]);

        assert!(matches!(
            load_wav_samples(&path),
            Err(AudioError::SampleRate { actual: 48000, .. })
        ));
    }

    #[test]
    fn test_empty_wav_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.wav");
        write_wav(&path, 16000, 1, &[]);

        assert!(matches!(load_wav_samples(&path), Err(AudioError::NoAudioData)));
    }
}
