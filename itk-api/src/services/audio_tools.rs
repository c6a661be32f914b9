//! Audio capabilities used by the pipeline
//!
//! - Duration measurement (header probe via lofty)
//! - Silent track generation (WAV via hound) for requests that ask for a
//!   duration but bring no audio

use async_trait::async_trait;
use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sample rate of generated silent tracks
pub const SILENCE_SAMPLE_RATE: u32 = 16_000;

/// Audio capability errors
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Invalid duration: {0}")]
    InvalidDuration(f64),

    #[error("WAV write failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio task failed: {0}")]
    Task(String),
}

/// Audio operations needed by the job pipeline
#[async_trait]
pub trait AudioTools: Send + Sync {
    /// Duration in seconds, or `None` when the file cannot be measured
    async fn duration_seconds(&self, path: &Path) -> Option<f64>;

    /// Write a silent track of `seconds` to `output`
    async fn generate_silence(&self, seconds: f64, output: &Path) -> Result<PathBuf, AudioError>;
}

/// Filesystem-backed implementation
#[derive(Debug, Clone, Default)]
pub struct LocalAudioTools;

impl LocalAudioTools {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioTools for LocalAudioTools {
    async fn duration_seconds(&self, path: &Path) -> Option<f64> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || probe_duration(&path))
            .await
            .ok()
            .flatten()
    }

    async fn generate_silence(&self, seconds: f64, output: &Path) -> Result<PathBuf, AudioError> {
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || write_silence(seconds, &output))
            .await
            .map_err(|e| AudioError::Task(e.to_string()))?
    }
}

/// Read the duration from the container header
///
/// The format is sniffed from the content: downloaded and inline tracks are
/// stored under a `.wav` name whatever they contain.
pub fn probe_duration(path: &Path) -> Option<f64> {
    let probed = Probe::open(path)
        .and_then(|probe| probe.guess_file_type().map_err(Into::into))
        .and_then(|probe| probe.read());
    let tagged_file = match probed {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not measure audio duration");
            return None;
        }
    };

    let seconds = tagged_file.properties().duration().as_secs_f64();
    if seconds > 0.0 {
        Some(seconds)
    } else {
        None
    }
}

/// Write a mono 16-bit silent WAV
pub fn write_silence(seconds: f64, output: &Path) -> Result<PathBuf, AudioError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(AudioError::InvalidDuration(seconds));
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SILENCE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)?;
    let total_samples = (seconds * f64::from(SILENCE_SAMPLE_RATE)).ceil() as u64;
    for _ in 0..total_samples {
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;

    tracing::debug!(path = %output.display(), seconds, "Generated silent audio");
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_silence_measures_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task_x").join("silent_audio.wav");
        let tools = LocalAudioTools::new();

        let written = tools.generate_silence(2.5, &path).await.unwrap();
        assert_eq!(written, path);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, SILENCE_SAMPLE_RATE);
        assert_eq!(reader.duration(), 40_000);
        assert!(reader.into_samples::<i16>().all(|s| s.unwrap() == 0));

        let measured = tools.duration_seconds(&path).await.unwrap();
        assert!((measured - 2.5).abs() < 0.05, "measured {}", measured);
    }

    /// CBR MPEG-1 Layer III stream: 128 kbps, 44.1 kHz, 417-byte frames
    fn mp3_frames(count: usize) -> Vec<u8> {
        let mut frame = vec![0u8; 417];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x64]);
        frame.repeat(count)
    }

    #[test]
    fn test_duration_sniffed_from_content_not_extension() {
        let dir = tempfile::tempdir().unwrap();
        let stream = mp3_frames(240);

        let honest = dir.path().join("audio.mp3");
        let misnamed = dir.path().join("input_audio.wav");
        std::fs::write(&honest, &stream).unwrap();
        std::fs::write(&misnamed, &stream).unwrap();

        // 240 frames * 1152 samples / 44100 Hz
        let expected = 240.0 * 1152.0 / 44_100.0;
        for path in [&honest, &misnamed] {
            let measured = probe_duration(path).unwrap();
            assert!((measured - expected).abs() < 0.25, "{}: measured {}", path.display(), measured);
        }
    }

    #[test]
    fn test_unreadable_audio_is_unmeasured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input_audio.wav");
        std::fs::write(&path, b"not audio at all").unwrap();
        assert_eq!(probe_duration(&path), None);
        assert_eq!(probe_duration(&dir.path().join("missing.wav")), None);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        assert!(matches!(write_silence(0.0, &path), Err(AudioError::InvalidDuration(_))));
        assert!(matches!(write_silence(f64::NAN, &path), Err(AudioError::InvalidDuration(_))));
    }

    #[tokio::test]
    async fn test_unreadable_file_has_no_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(LocalAudioTools::new().duration_seconds(&path).await.is_none());
    }
}
