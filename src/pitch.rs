use anyhow::{Context, Result};
use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Turns a recorded take into a pitch-data artifact on disk.
///
/// The returned file belongs to the caller, who deletes it. On error the
/// implementation must not leave a pitch file behind.
#[async_trait]
pub trait PitchExtractor: Send + Sync {
    async fn extract(&self, recording: &Path) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchPoint {
    /// Seconds from the start of the take
    pub time: f32,
    /// None where the frame is silent or unpitched
    pub hz: Option<f32>,
}

/// Frame-by-frame YIN pitch tracker writing a JSON pitch track
#[derive(Debug, Clone)]
pub struct YinPitchExtractor {
    frame_size: usize,
    amplitude_threshold: f32,
    output_dir: PathBuf,
}

impl YinPitchExtractor {
    pub const FRAME_SIZE: usize = 2048;

    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            frame_size: Self::FRAME_SIZE,
            amplitude_threshold: 0.01,
            output_dir,
        }
    }

    fn extract_blocking(&self, recording: &Path) -> Result<PathBuf> {
        let (mono, sample_rate) = read_mono(recording)?;
        let points = track_pitches(&mono, sample_rate, self.frame_size, self.amplitude_threshold);

        let file = tempfile::Builder::new()
            .prefix("rehearsal-pitches-")
            .suffix(".json")
            .tempfile_in(&self.output_dir)
            .context("Failed to create pitch file")?;

        // Not persisted until fully written, so failures leave nothing behind
        let mut writer = BufWriter::new(file.as_file());
        serde_json::to_writer(&mut writer, &points).context("Failed to write pitch file")?;
        writer.flush().context("Failed to write pitch file")?;
        drop(writer);

        let path = file
            .into_temp_path()
            .keep()
            .context("Failed to persist pitch file")?;

        tracing::debug!("Wrote {} pitch points to {:?}", points.len(), path);
        Ok(path)
    }
}

#[async_trait]
impl PitchExtractor for YinPitchExtractor {
    async fn extract(&self, recording: &Path) -> Result<PathBuf> {
        let extractor = self.clone();
        let recording = recording.to_path_buf();

        tokio::task::spawn_blocking(move || extractor.extract_blocking(&recording))
            .await
            .context("Pitch extraction task failed")?
    }
}

fn read_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("Failed to open recording: {:?}", path))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}

/// Pitch for each non-overlapping frame of `signal`
pub fn track_pitches(
    signal: &[f32],
    sample_rate: u32,
    frame_size: usize,
    amplitude_threshold: f32,
) -> Vec<PitchPoint> {
    signal
        .chunks_exact(frame_size)
        .enumerate()
        .map(|(i, frame)| PitchPoint {
            time: (i * frame_size) as f32 / sample_rate as f32,
            hz: detect_pitch_yin(frame, sample_rate, amplitude_threshold),
        })
        .collect()
}

/// YIN fundamental estimate for one frame, or None for silence and noise
pub fn detect_pitch_yin(signal: &[f32], sample_rate: u32, amplitude_threshold: f32) -> Option<f32> {
    const CLARITY_THRESHOLD: f32 = 0.1;

    let half = signal.len() / 2;
    if half < 3 {
        return None;
    }

    let rms = (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt();
    if rms < amplitude_threshold {
        return None;
    }

    // Difference function
    let mut d = vec![0.0f32; half];
    for (tau, slot) in d.iter_mut().enumerate().skip(1) {
        *slot = (0..half)
            .map(|i| {
                let delta = signal[i] - signal[i + tau];
                delta * delta
            })
            .sum();
    }

    // Cumulative mean normalised difference
    d[0] = 1.0;
    let mut running_sum = 0.0;
    for (tau, slot) in d.iter_mut().enumerate().skip(1) {
        running_sum += *slot;
        *slot = if running_sum != 0.0 {
            *slot * tau as f32 / running_sum
        } else {
            1.0
        };
    }

    // First dip near the global minimum avoids octave errors
    let min_val = d.iter().skip(1).cloned().fold(f32::INFINITY, f32::min);
    let threshold = min_val + 0.05;
    let period = (2..half).find(|&tau| d[tau] < threshold && d[tau] < d[tau - 1])?;

    if d[period] > CLARITY_THRESHOLD || period + 1 >= half {
        return None;
    }

    let (y1, y2, y3) = (d[period - 1], d[period], d[period + 1]);
    let curvature = y1 - 2.0 * y2 + y3;
    let period = if curvature != 0.0 {
        period as f32 + (y1 - y3) / (2.0 * curvature)
    } else {
        period as f32
    };

    let frequency = sample_rate as f32 / period;
    (frequency.is_finite() && frequency > 20.0).then_some(frequency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFormat, artifact};

    fn sine(hz: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * hz * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_detects_a440() {
        let signal = sine(440.0, 44100, 2048);
        let hz = detect_pitch_yin(&signal, 44100, 0.01).unwrap();
        assert!((hz - 440.0).abs() < 2.0, "got {hz}");
    }

    #[test]
    fn test_silence_has_no_pitch() {
        assert_eq!(detect_pitch_yin(&[0.0; 2048], 44100, 0.01), None);
    }

    #[test]
    fn test_track_pitches_times_frames() {
        let signal = sine(220.0, 8000, 4096 + 100);
        let points = track_pitches(&signal, 8000, 2048, 0.01);
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].time, 0.256);
    }

    #[tokio::test]
    async fn test_extract_writes_json_pitch_track() {
        let dir = tempfile::tempdir().unwrap();
        let samples = sine(330.0, 44100, 44100 / 4);
        let take = artifact::write_take(dir.path(), AudioFormat::default(), &samples).unwrap();

        let extractor = YinPitchExtractor::new(dir.path().to_path_buf());
        let pitch_path = extractor.extract(&take).await.unwrap();

        let points: Vec<PitchPoint> =
            serde_json::from_str(&std::fs::read_to_string(&pitch_path).unwrap()).unwrap();
        assert_eq!(points.len(), (44100 / 4) / 2048);
        assert!(points.iter().all(|p| p.hz.is_some()));
    }

    #[tokio::test]
    async fn test_extract_missing_recording_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = YinPitchExtractor::new(dir.path().to_path_buf());

        assert!(extractor.extract(&dir.path().join("gone.wav")).await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
