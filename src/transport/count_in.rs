use super::scheduler::{Scheduler, TimerId};
use crate::track::TrackTiming;
use std::time::{Duration, Instant};

pub const DEFAULT_COUNT_IN_BEATS: u32 = 4;

pub fn beat_interval_ms(bpm: f64) -> f64 {
    60_000.0 / bpm
}

/// Delay before the first click, so clicks land on the track's beat grid
/// relative to where playback resumes. Always within `[0, beat interval)`.
pub fn count_in_offset_ms(position_ms: f64, first_beat_ms: f64, bpm: f64) -> f64 {
    let interval = beat_interval_ms(bpm);
    let offset = (position_ms + first_beat_ms).rem_euclid(interval);
    // rem_euclid can round up to the divisor for tiny negative inputs
    if offset >= interval { 0.0 } else { offset }
}

fn ms(value: f64) -> Duration {
    Duration::from_micros((value * 1000.0).round() as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountInStep {
    /// Play click number `n` (1-based)
    Click(u32),
    /// All clicks played; start the track now
    Finished,
}

/// Metronome lead-in before playback starts or resumes.
///
/// Plays `beats` clicks one beat apart, then reports `Finished` on the
/// following beat. Cancelling discards the count entirely.
#[derive(Debug)]
pub struct CountInSequencer {
    beats: u32,
    count: u32,
    timer: Option<TimerId>,
}

impl CountInSequencer {
    pub fn new(beats: u32) -> Self {
        Self {
            beats,
            count: 0,
            timer: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.timer.is_some()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn begin(
        &mut self,
        scheduler: &mut Scheduler,
        now: Instant,
        position: Duration,
        timing: &TrackTiming,
    ) {
        self.cancel(scheduler);

        let interval = beat_interval_ms(timing.bpm);
        let offset = count_in_offset_ms(
            position.as_secs_f64() * 1000.0,
            timing.first_beat.as_secs_f64() * 1000.0,
            timing.bpm,
        );

        tracing::debug!(
            "Count-in: first click in {:.0}ms, then every {:.0}ms",
            offset,
            interval
        );
        self.timer = Some(scheduler.schedule_repeating(now, ms(offset), ms(interval)));
    }

    /// Handle a fired timer. Returns None if it is not this sequencer's.
    pub fn on_timer(&mut self, scheduler: &mut Scheduler, id: TimerId) -> Option<CountInStep> {
        if self.timer != Some(id) {
            return None;
        }

        self.count += 1;
        if self.count > self.beats {
            self.cancel(scheduler);
            return Some(CountInStep::Finished);
        }
        Some(CountInStep::Click(self.count))
    }

    pub fn cancel(&mut self, scheduler: &mut Scheduler) {
        if let Some(id) = self.timer.take() {
            scheduler.cancel(id);
        }
        self.count = 0;
    }
}
