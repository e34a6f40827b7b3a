use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::time::Duration;

/// Tempo and labelling that WAV files do not carry themselves
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMeta {
    pub artist: String,
    pub title: String,
    pub bpm: f64,
    pub first_beat: Duration,
}

/// The reference song, loaded once and read-only afterwards
#[derive(Debug, Clone)]
pub struct Track {
    pub meta: TrackMeta,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: Duration,
    /// Interleaved, normalised to -1.0..=1.0
    pub samples: Vec<f32>,
}

/// What the transport needs to know about a track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackTiming {
    pub duration: Duration,
    pub bpm: f64,
    pub first_beat: Duration,
}

impl Track {
    pub fn load(path: &Path, meta: TrackMeta) -> Result<Self> {
        let mut reader = WavReader::open(path)
            .with_context(|| format!("Failed to open track: {:?}", path))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .with_context(|| format!("Failed to decode track: {:?}", path))?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .with_context(|| format!("Failed to decode track: {:?}", path))?
            }
        };

        let frames = samples.len() / spec.channels.max(1) as usize;
        let duration = Duration::from_secs_f64(frames as f64 / spec.sample_rate as f64);

        tracing::info!(
            "Loaded {:?} ({} Hz, {} ch, {:.2}s)",
            path,
            spec.sample_rate,
            spec.channels,
            duration.as_secs_f64()
        );

        Ok(Self {
            meta,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            duration,
            samples,
        })
    }

    pub fn timing(&self) -> TrackTiming {
        TrackTiming {
            duration: self.duration,
            bpm: self.meta.bpm,
            first_beat: self.meta.first_beat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn meta() -> TrackMeta {
        TrackMeta {
            artist: "Guns N' Roses".to_string(),
            title: "Sweet Child O' Mine".to_string(),
            bpm: 125.0,
            first_beat: Duration::from_millis(40),
        }
    }

    #[test]
    fn test_loads_int_wav_and_derives_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..16000 {
            writer.write_sample(i16::MAX / 2).unwrap();
        }
        writer.finalize().unwrap();

        let track = Track::load(&path, meta()).unwrap();

        assert_eq!(track.duration, Duration::from_secs(1));
        assert_eq!(track.samples.len(), 16000);
        assert!((track.samples[0] - 0.5).abs() < 0.001);
        assert_eq!(track.timing().bpm, 125.0);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Track::load(Path::new("/nonexistent/song.wav"), meta()).unwrap_err();
        assert!(format!("{err:#}").contains("song.wav"));
    }
}
