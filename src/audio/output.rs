use crate::track::Track;
use anyhow::{Context, Result};
use rodio::buffer::SamplesBuffer;
use rodio::source::{Buffered, SineWave, Source};
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use std::time::Duration;

const CLICK_HZ: f32 = 1760.0;
const CLICK_LENGTH: Duration = Duration::from_millis(40);
const CLICK_GAIN: f32 = 0.4;

/// Where the transport sends audible playback
pub trait PlaybackOutput {
    /// Begin playing the track from `from`, replacing anything already playing
    fn start(&mut self, from: Duration);

    fn pause(&mut self);

    /// One metronome click
    fn click(&mut self);
}

/// Plays the reference track and metronome through the default output device
///
/// Holds a cpal stream, so it is `!Send` and lives on the local task.
pub struct RodioOutput {
    stream: OutputStream,
    sink: Sink,
    track: Buffered<SamplesBuffer>,
}

impl RodioOutput {
    pub fn open(track: &Track) -> Result<Self> {
        let stream =
            OutputStreamBuilder::open_default_stream().context("Failed to open audio output")?;
        let sink = Sink::connect_new(stream.mixer());
        sink.pause();

        // Walk the source once so the first play does not pay for buffering
        let track = track_source(track);
        track.clone().for_each(drop);

        Ok(Self {
            stream,
            sink,
            track,
        })
    }
}

/// Decoded once; clones share the samples and start from the beginning
fn track_source(track: &Track) -> Buffered<SamplesBuffer> {
    SamplesBuffer::new(track.channels, track.sample_rate, track.samples.clone()).buffered()
}

impl PlaybackOutput for RodioOutput {
    fn start(&mut self, from: Duration) {
        let source = self.track.clone().skip_duration(from);

        self.sink.clear();
        self.sink.append(source);
        self.sink.play();
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn click(&mut self) {
        let click = SineWave::new(CLICK_HZ)
            .take_duration(CLICK_LENGTH)
            .amplify(CLICK_GAIN);
        self.stream.mixer().add(click);
    }
}

/// Output for when no audio device is available
pub struct SilentOutput;

impl PlaybackOutput for SilentOutput {
    fn start(&mut self, from: Duration) {
        tracing::debug!("(silent) start at {:.2}s", from.as_secs_f64());
    }

    fn pause(&mut self) {}

    fn click(&mut self) {
        tracing::debug!("(silent) click");
    }
}

impl<O: PlaybackOutput + ?Sized> PlaybackOutput for Box<O> {
    fn start(&mut self, from: Duration) {
        (**self).start(from);
    }

    fn pause(&mut self) {
        (**self).pause();
    }

    fn click(&mut self) {
        (**self).click();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackMeta;

    fn counting_track() -> Track {
        Track {
            meta: TrackMeta {
                artist: String::new(),
                title: String::new(),
                bpm: 120.0,
                first_beat: Duration::ZERO,
            },
            sample_rate: 10,
            channels: 1,
            duration: Duration::from_secs(10),
            samples: (0..100).map(|i| i as f32).collect(),
        }
    }

    #[test]
    fn test_track_source_starts_from_any_position() {
        let source = track_source(&counting_track());

        let from_one: Vec<f32> = source
            .clone()
            .skip_duration(Duration::from_secs(1))
            .take(3)
            .collect();
        assert_eq!(from_one, vec![10.0, 11.0, 12.0]);

        let from_six: Vec<f32> = source
            .clone()
            .skip_duration(Duration::from_secs(6))
            .take(2)
            .collect();
        assert_eq!(from_six, vec![60.0, 61.0]);
    }

    #[test]
    fn test_track_source_clones_are_independent() {
        let source = track_source(&counting_track());

        let played: Vec<f32> = source.clone().collect();
        assert_eq!(played.len(), 100);

        let again: Vec<f32> = source.clone().take(2).collect();
        assert_eq!(again, vec![0.0, 1.0]);
    }
}
