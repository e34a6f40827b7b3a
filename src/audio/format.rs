use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample encoding requested from the input device and written to take artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    F32,
    I16,
}

impl SampleFormat {
    pub fn bits_per_sample(&self) -> u16 {
        match self {
            SampleFormat::F32 => 32,
            SampleFormat::I16 => 16,
        }
    }

    pub fn to_cpal(self) -> cpal::SampleFormat {
        match self {
            SampleFormat::F32 => cpal::SampleFormat::F32,
            SampleFormat::I16 => cpal::SampleFormat::I16,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::F32 => write!(f, "f32"),
            SampleFormat::I16 => write!(f, "i16"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// Number of frames covering `seconds` of audio
    pub fn frames_for_duration(&self, seconds: f64) -> usize {
        (self.sample_rate as f64 * seconds.max(0.0)).round() as usize
    }

    /// Number of interleaved samples covering `seconds` of audio
    pub fn samples_for_duration(&self, seconds: f64) -> usize {
        self.frames_for_duration(seconds) * self.channels as usize
    }

    pub fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.sample_format.bits_per_sample(),
            sample_format: match self.sample_format {
                SampleFormat::F32 => hound::SampleFormat::Float,
                SampleFormat::I16 => hound::SampleFormat::Int,
            },
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            sample_format: SampleFormat::F32,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}",
            self.sample_rate, self.channels, self.sample_format
        )
    }
}
