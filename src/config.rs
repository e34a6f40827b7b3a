use crate::audio::{AudioFormat, SampleFormat};
use crate::track::TrackMeta;
use crate::transport::count_in::DEFAULT_COUNT_IN_BEATS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_song_path")]
    pub song_path: PathBuf,

    #[serde(default)]
    pub artist: String,

    #[serde(default)]
    pub title: String,

    #[serde(default = "default_bpm")]
    pub bpm: f64,

    #[serde(default)]
    pub first_beat_ms: f64,

    /// Index into the filtered input device list
    #[serde(default)]
    pub input_device: usize,

    #[serde(default = "default_record_duration")]
    pub record_duration_secs: f64,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    #[serde(default = "default_sample_format")]
    pub sample_format: SampleFormat,

    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_count_in_beats")]
    pub count_in_beats: u32,

    #[serde(default = "default_metronome_enabled")]
    pub metronome_enabled: bool,
}

fn default_song_path() -> PathBuf {
    PathBuf::from("assets/song.wav")
}

fn default_bpm() -> f64 {
    120.0
}

fn default_record_duration() -> f64 {
    5.0
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_channels() -> u16 {
    1
}

fn default_sample_format() -> SampleFormat {
    SampleFormat::F32
}

fn default_tick_interval() -> u64 {
    10
}

fn default_count_in_beats() -> u32 {
    DEFAULT_COUNT_IN_BEATS
}

fn default_metronome_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            song_path: default_song_path(),
            artist: String::new(),
            title: String::new(),
            bpm: default_bpm(),
            first_beat_ms: 0.0,
            input_device: 0,
            record_duration_secs: default_record_duration(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            sample_format: default_sample_format(),
            tick_interval_ms: default_tick_interval(),
            count_in_beats: default_count_in_beats(),
            metronome_enabled: default_metronome_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.config/rehearsal/config.json)
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".config")
        };

        Ok(config_dir.join("rehearsal").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(anyhow::anyhow!("bpm must be a positive number"));
        }

        if !self.first_beat_ms.is_finite() {
            return Err(anyhow::anyhow!("first_beat_ms must be finite"));
        }

        if !(self.record_duration_secs.is_finite() && self.record_duration_secs > 0.0) {
            return Err(anyhow::anyhow!("record_duration_secs must be positive"));
        }

        if self.sample_rate == 0 || self.channels == 0 {
            return Err(anyhow::anyhow!(
                "sample_rate and channels must be non-zero"
            ));
        }

        if self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("tick_interval_ms must be non-zero"));
        }

        if self.count_in_beats == 0 {
            return Err(anyhow::anyhow!("count_in_beats must be non-zero"));
        }

        Ok(())
    }

    pub fn capture_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_format: self.sample_format,
        }
    }

    pub fn track_meta(&self) -> TrackMeta {
        TrackMeta {
            artist: self.artist.clone(),
            title: self.title.clone(),
            bpm: self.bpm,
            first_beat: Duration::from_secs_f64(self.first_beat_ms.max(0.0) / 1000.0),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
