pub mod clock;
pub mod count_in;
pub mod scheduler;

pub use clock::{PlaybackClock, PlaybackState, PlaybackStatus};
pub use count_in::{CountInSequencer, CountInStep};
pub use scheduler::{Scheduler, TimerId};

use crate::audio::PlaybackOutput;
use crate::track::TrackTiming;
use std::time::{Duration, Instant};

/// What the UI needs to draw each refresh
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSnapshot {
    pub position: Duration,
    pub duration: Duration,
    pub status: PlaybackStatus,
    pub ended: bool,
    pub count: u32,
}

impl TransportSnapshot {
    /// "01:02.50 / 04:56.00"
    pub fn label(&self) -> String {
        format!(
            "{} / {}",
            format_timestamp(self.position),
            format_timestamp(self.duration)
        )
    }

    /// Playhead position as a fraction of the track
    pub fn progress(&self) -> f64 {
        if self.duration.is_zero() {
            return 0.0;
        }
        (self.position.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }
}

pub fn format_timestamp(t: Duration) -> String {
    let centis = t.as_millis() / 10;
    format!(
        "{:02}:{:02}.{:02}",
        centis / 6000,
        (centis / 100) % 60,
        centis % 100
    )
}

/// Play/pause/seek controller combining the clock, count-in and output.
///
/// All timers run on the owned `Scheduler`; the owner calls `poll` from its
/// event loop.
pub struct Transport<O: PlaybackOutput> {
    timing: TrackTiming,
    clock: PlaybackClock,
    count_in: CountInSequencer,
    scheduler: Scheduler,
    output: O,
    tick_interval: Duration,
    position_timer: Option<TimerId>,
    metronome: bool,
}

impl<O: PlaybackOutput> Transport<O> {
    pub fn new(timing: TrackTiming, output: O, tick_interval: Duration, count_in_beats: u32) -> Self {
        Self {
            timing,
            clock: PlaybackClock::new(timing.duration),
            count_in: CountInSequencer::new(count_in_beats),
            scheduler: Scheduler::new(),
            output,
            tick_interval,
            position_timer: None,
            metronome: true,
        }
    }

    pub fn set_metronome(&mut self, enabled: bool) {
        self.metronome = enabled;
    }

    pub fn status(&self) -> PlaybackStatus {
        self.clock.status()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Start a count-in, after which the track plays
    pub fn play(&mut self, now: Instant) {
        match self.clock.status() {
            PlaybackStatus::Playing | PlaybackStatus::CountingIn => {
                tracing::debug!("Already playing, ignoring play");
            }
            PlaybackStatus::Stopped | PlaybackStatus::Paused => self.start_count_in(now),
        }
    }

    pub fn pause(&mut self, now: Instant) {
        // Pausing mid count-in discards it
        self.count_in.cancel(&mut self.scheduler);
        self.stop_position_timer();

        if self.clock.pause(now) {
            self.output.pause();
            tracing::info!("Paused at {}", format_timestamp(self.clock.position()));
        }
    }

    /// Jump to `target_secs`. A playing or counting-in transport restarts its count-in.
    pub fn seek(&mut self, target_secs: f64, now: Instant) {
        let counting_in = self.count_in.is_active();
        let was_playing = self.clock.seek(target_secs);

        tracing::info!(
            "Song skipped to: {}",
            format_timestamp(self.clock.position())
        );

        if counting_in {
            self.count_in.cancel(&mut self.scheduler);
            self.start_count_in(now);
        } else if was_playing {
            self.stop_position_timer();
            self.output.pause();
            self.start_count_in(now);
        }
    }

    /// Seek to a fraction of the track, as from a click on the waveform
    pub fn seek_fraction(&mut self, fraction: f64, now: Instant) {
        let target = fraction.max(0.0) * self.timing.duration.as_secs_f64();
        self.seek(target, now);
    }

    /// Run every timer due at `now`
    pub fn poll(&mut self, now: Instant) -> TransportSnapshot {
        for id in self.scheduler.poll(now) {
            self.on_timer(id, now);
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        let state = self.clock.state();
        TransportSnapshot {
            position: state.position,
            duration: self.timing.duration,
            status: state.status,
            ended: state.ended,
            count: self.count_in.count(),
        }
    }

    fn on_timer(&mut self, id: TimerId, now: Instant) {
        if let Some(step) = self.count_in.on_timer(&mut self.scheduler, id) {
            match step {
                CountInStep::Click(n) => {
                    tracing::debug!("Count-in {}", n);
                    if self.metronome {
                        self.output.click();
                    }
                }
                CountInStep::Finished => self.start_playback(now),
            }
            return;
        }

        if self.position_timer == Some(id) {
            self.clock.tick(now);
            if self.clock.state().ended {
                tracing::info!("Song ended");
                self.stop_position_timer();
                self.output.pause();
                self.clock.rewind();
            }
        }
    }

    fn start_count_in(&mut self, now: Instant) {
        self.clock.begin_count_in();
        self.count_in
            .begin(&mut self.scheduler, now, self.clock.position(), &self.timing);
    }

    fn start_playback(&mut self, now: Instant) {
        self.clock.play(now);
        self.output.start(self.clock.position());
        self.stop_position_timer();
        self.position_timer = Some(self.scheduler.schedule_repeating(
            now,
            self.tick_interval,
            self.tick_interval,
        ));
        tracing::info!("Playing from {}", format_timestamp(self.clock.position()));
    }

    fn stop_position_timer(&mut self) {
        if let Some(id) = self.position_timer.take() {
            self.scheduler.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct RecordingOutput {
        starts: Vec<Duration>,
        pauses: usize,
        clicks: usize,
    }

    impl PlaybackOutput for RecordingOutput {
        fn start(&mut self, from: Duration) {
            self.starts.push(from);
        }

        fn pause(&mut self) {
            self.pauses += 1;
        }

        fn click(&mut self) {
            self.clicks += 1;
        }
    }

    const MS: Duration = Duration::from_millis(1);

    fn transport(duration_secs: u64) -> Transport<RecordingOutput> {
        let timing = TrackTiming {
            duration: Duration::from_secs(duration_secs),
            bpm: 120.0,
            first_beat: Duration::ZERO,
        };
        Transport::new(timing, RecordingOutput::default(), 10 * MS, 4)
    }

    /// Poll at every deadline up to `end`
    fn run_until(t: &mut Transport<RecordingOutput>, end: Instant) -> TransportSnapshot {
        while let Some(deadline) = t.next_deadline() {
            if deadline > end {
                break;
            }
            t.poll(deadline);
        }
        t.poll(end)
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(Duration::ZERO), "00:00.00");
        assert_eq!(format_timestamp(Duration::from_millis(62_505)), "01:02.50");
        assert_eq!(format_timestamp(Duration::from_secs(600)), "10:00.00");
    }

    #[test]
    fn test_play_counts_in_then_plays() {
        let t0 = Instant::now();
        let mut t = transport(60);

        t.play(t0);
        assert_eq!(t.status(), PlaybackStatus::CountingIn);

        // clicks at 0, 500, 1000, 1500; playback on 2000
        let snap = run_until(&mut t, t0 + 1999 * MS);
        assert_eq!(snap.status, PlaybackStatus::CountingIn);
        assert_eq!(t.output().clicks, 4);

        let snap = run_until(&mut t, t0 + 2000 * MS);
        assert_eq!(snap.status, PlaybackStatus::Playing);
        assert_eq!(t.output().starts, vec![Duration::ZERO]);

        let snap = run_until(&mut t, t0 + 3000 * MS);
        assert_eq!(snap.position, Duration::from_secs(1));
        assert_eq!(t.output().clicks, 4);
    }

    #[test]
    fn test_stalled_poll_keeps_clicks_a_beat_apart() {
        let t0 = Instant::now();
        let mut t = transport(60);
        t.play(t0);

        // the owner was busy for five seconds
        t.poll(t0 + 5000 * MS);
        assert_eq!(t.output().clicks, 1);
        assert_eq!(t.next_deadline(), Some(t0 + 5500 * MS));

        t.poll(t0 + 5001 * MS);
        assert_eq!(t.output().clicks, 1);

        for (clicks, at) in [(2, 5500), (3, 6000), (4, 6500)] {
            assert_eq!(t.next_deadline(), Some(t0 + at * MS));
            t.poll(t0 + at * MS);
            assert_eq!(t.output().clicks, clicks);
            assert!(t.output().starts.is_empty());
        }

        t.poll(t0 + 7000 * MS);
        assert_eq!(t.status(), PlaybackStatus::Playing);
        assert_eq!(t.output().starts, vec![Duration::ZERO]);
    }

    #[test]
    fn test_pause_during_count_in_discards_it() {
        let t0 = Instant::now();
        let mut t = transport(60);

        t.play(t0);
        run_until(&mut t, t0 + 700 * MS);
        assert_eq!(t.snapshot().count, 2);

        t.pause(t0 + 700 * MS);
        assert_eq!(t.snapshot().count, 0);
        assert_eq!(t.status(), PlaybackStatus::Paused);
        assert_eq!(t.next_deadline(), None);

        run_until(&mut t, t0 + 5000 * MS);
        assert!(t.output().starts.is_empty());
    }

    #[test]
    fn test_seek_during_count_in_restarts_it() {
        let t0 = Instant::now();
        let mut t = transport(60);

        t.play(t0);
        run_until(&mut t, t0 + 1200 * MS);
        assert_eq!(t.output().clicks, 3);

        let t1 = t0 + 1200 * MS;
        t.seek(10.25, t1);
        assert_eq!(t.snapshot().count, 0);
        assert_eq!(t.status(), PlaybackStatus::CountingIn);

        // first click 250ms after the seek, four clicks, play a beat later
        run_until(&mut t, t1 + 2249 * MS);
        assert_eq!(t.output().clicks, 7);
        assert!(t.output().starts.is_empty());

        run_until(&mut t, t1 + 2250 * MS);
        assert_eq!(t.output().starts, vec![Duration::from_millis(10_250)]);
    }

    #[test]
    fn test_seek_while_playing_demands_fresh_count_in() {
        let t0 = Instant::now();
        let mut t = transport(60);
        t.play(t0);
        run_until(&mut t, t0 + 3000 * MS);
        assert_eq!(t.status(), PlaybackStatus::Playing);

        t.seek(20.0, t0 + 3000 * MS);
        assert_eq!(t.status(), PlaybackStatus::CountingIn);
        assert_eq!(t.output().pauses, 1);

        let snap = run_until(&mut t, t0 + 4000 * MS);
        assert_eq!(snap.position, Duration::from_secs(20));
    }

    #[test]
    fn test_seek_while_paused_only_moves() {
        let t0 = Instant::now();
        let mut t = transport(60);

        t.seek_fraction(0.5, t0);
        assert_eq!(t.status(), PlaybackStatus::Stopped);
        assert_eq!(t.snapshot().position, Duration::from_secs(30));
        assert_eq!(t.next_deadline(), None);
    }

    #[test]
    fn test_end_of_song_stops_and_rewinds() {
        let t0 = Instant::now();
        let mut t = transport(3);
        t.play(t0);

        let snap = run_until(&mut t, t0 + 10_000 * MS);
        assert!(snap.ended);
        assert_eq!(snap.status, PlaybackStatus::Stopped);
        assert_eq!(snap.position, Duration::ZERO);
        assert_eq!(snap.label(), "00:00.00 / 00:03.00");
        assert_eq!(t.next_deadline(), None);
        assert_eq!(t.output().pauses, 1);
    }

    #[test]
    fn test_metronome_can_be_muted() {
        let t0 = Instant::now();
        let mut t = transport(60);
        t.set_metronome(false);
        t.play(t0);

        run_until(&mut t, t0 + 2500 * MS);
        assert_eq!(t.output().clicks, 0);
        assert_eq!(t.status(), PlaybackStatus::Playing);
    }
}
