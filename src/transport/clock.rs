use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Stopped,
    CountingIn,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub position: Duration,
    pub status: PlaybackStatus,
    pub ended: bool,
}

/// Wall-clock position tracker for the reference track.
///
/// Position advances with elapsed `Instant` time while playing, not with
/// audio frames, so it can drift slightly from the output device.
#[derive(Debug)]
pub struct PlaybackClock {
    duration: Duration,
    state: PlaybackState,
    // Position at the instant playback (re)started
    anchor: Option<(Instant, Duration)>,
}

impl PlaybackClock {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: PlaybackState {
                position: Duration::ZERO,
                status: PlaybackStatus::Stopped,
                ended: false,
            },
            anchor: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    pub fn position(&self) -> Duration {
        self.state.position
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Mark the clock as waiting on a count-in. Valid from Stopped or Paused.
    pub fn begin_count_in(&mut self) -> bool {
        match self.state.status {
            PlaybackStatus::Stopped | PlaybackStatus::Paused => {
                self.state.status = PlaybackStatus::CountingIn;
                true
            }
            _ => false,
        }
    }

    /// Start advancing from the current position
    pub fn play(&mut self, now: Instant) -> bool {
        match self.state.status {
            PlaybackStatus::Playing => false,
            _ => {
                if self.state.ended {
                    self.state.ended = false;
                    self.state.position = Duration::ZERO;
                }
                self.state.status = PlaybackStatus::Playing;
                self.anchor = Some((now, self.state.position));
                true
            }
        }
    }

    /// Freeze the position. A pending count-in is also abandoned.
    pub fn pause(&mut self, now: Instant) -> bool {
        match self.state.status {
            PlaybackStatus::Playing => {
                self.advance(now);
                self.anchor = None;
                self.state.status = PlaybackStatus::Paused;
                true
            }
            PlaybackStatus::CountingIn => {
                self.state.status = PlaybackStatus::Paused;
                true
            }
            _ => false,
        }
    }

    /// Move to `target_secs`, clamped to `[0, duration)`.
    ///
    /// A playing clock drops to Paused; the caller restarts it through a
    /// fresh count-in. Returns whether the clock was playing.
    pub fn seek(&mut self, target_secs: f64) -> bool {
        self.state.position = self.clamp(target_secs);
        self.state.ended = false;

        let was_playing = self.state.status == PlaybackStatus::Playing;
        if was_playing {
            self.anchor = None;
            self.state.status = PlaybackStatus::Paused;
        }
        was_playing
    }

    /// Advance by elapsed wall time. Reaching the end stops the clock.
    pub fn tick(&mut self, now: Instant) -> Duration {
        if self.state.status == PlaybackStatus::Playing {
            self.advance(now);
            if self.state.position >= self.duration {
                self.state.position = self.duration;
                self.state.ended = true;
                self.state.status = PlaybackStatus::Stopped;
                self.anchor = None;
            }
        }
        self.state.position
    }

    /// Reset the position to the start without touching status or `ended`
    pub fn rewind(&mut self) {
        self.state.position = Duration::ZERO;
        if let Some((now, _)) = self.anchor {
            self.anchor = Some((now, Duration::ZERO));
        }
    }

    fn advance(&mut self, now: Instant) {
        if let Some((since, from)) = self.anchor {
            let elapsed = now.saturating_duration_since(since);
            self.state.position = (from + elapsed).min(self.duration);
        }
    }

    fn clamp(&self, target_secs: f64) -> Duration {
        if !(target_secs > 0.0) {
            return Duration::ZERO;
        }
        let last = self.duration.saturating_sub(Duration::from_nanos(1));
        if target_secs >= self.duration.as_secs_f64() {
            return last;
        }
        Duration::from_secs_f64(target_secs).min(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONG: Duration = Duration::from_secs(10);

    #[test]
    fn test_position_follows_wall_time() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(SONG);

        assert!(clock.play(t0));
        assert_eq!(clock.tick(t0 + Duration::from_millis(1500)), Duration::from_millis(1500));
        assert!(clock.pause(t0 + Duration::from_secs(2)));
        assert_eq!(clock.tick(t0 + Duration::from_secs(5)), Duration::from_secs(2));
        assert_eq!(clock.status(), PlaybackStatus::Paused);
    }

    #[test]
    fn test_resume_continues_from_paused_position() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(SONG);

        clock.play(t0);
        clock.pause(t0 + Duration::from_secs(1));
        clock.play(t0 + Duration::from_secs(4));
        assert_eq!(clock.tick(t0 + Duration::from_secs(5)), Duration::from_secs(2));
    }

    #[test]
    fn test_pause_is_only_valid_while_playing_or_counting() {
        let mut clock = PlaybackClock::new(SONG);
        assert!(!clock.pause(Instant::now()));
        assert_eq!(clock.status(), PlaybackStatus::Stopped);
    }

    #[test]
    fn test_seek_clamps_to_bounds() {
        let mut clock = PlaybackClock::new(SONG);

        clock.seek(-3.0);
        assert_eq!(clock.position(), Duration::ZERO);

        clock.seek(f64::NAN);
        assert_eq!(clock.position(), Duration::ZERO);

        clock.seek(42.0);
        assert!(clock.position() < SONG);
        assert!(clock.position() > Duration::from_millis(9999));

        clock.seek(10.0);
        assert!(clock.position() < SONG);

        clock.seek(4.25);
        assert_eq!(clock.position(), Duration::from_millis(4250));
    }

    #[test]
    fn test_seek_while_playing_pauses() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(SONG);
        clock.play(t0);

        assert!(clock.seek(3.0));
        assert_eq!(clock.status(), PlaybackStatus::Paused);
        assert_eq!(clock.tick(t0 + Duration::from_secs(9)), Duration::from_secs(3));
    }

    #[test]
    fn test_tick_never_passes_duration() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(SONG);
        clock.seek(9.5);
        clock.play(t0);

        let position = clock.tick(t0 + Duration::from_secs(30));
        assert_eq!(position, SONG);
        assert!(clock.state().ended);
        assert_eq!(clock.status(), PlaybackStatus::Stopped);
        assert_eq!(clock.tick(t0 + Duration::from_secs(60)), SONG);
    }

    #[test]
    fn test_play_after_end_restarts_from_zero() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(SONG);
        clock.play(t0);
        clock.tick(t0 + SONG);

        assert!(clock.play(t0 + SONG));
        assert!(!clock.state().ended);
        assert_eq!(clock.position(), Duration::ZERO);
    }
}
