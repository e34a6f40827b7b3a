use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Timer {
    due: Instant,
    every: Option<Duration>,
}

/// Timer service driven by whoever owns the event loop.
///
/// Nothing fires on its own: the owner calls `poll` with the current time
/// (real or simulated) and routes the returned ids. Each timer fires at most
/// once per poll. A repeating timer keeps its phase: occurrences a late poll
/// missed are skipped, never fired back to back.
#[derive(Debug, Default)]
pub struct Scheduler {
    next_id: u64,
    timers: HashMap<TimerId, Timer>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_once(&mut self, now: Instant, after: Duration) -> TimerId {
        self.insert(now + after, None)
    }

    pub fn schedule_repeating(&mut self, now: Instant, first: Duration, every: Duration) -> TimerId {
        self.insert(now + first, Some(every.max(Duration::from_millis(1))))
    }

    /// Returns false if the timer already fired (one-shot) or was cancelled
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.due).min()
    }

    /// Collect every timer due at `now`, earliest first
    pub fn poll(&mut self, now: Instant) -> Vec<TimerId> {
        let mut fired: Vec<(Instant, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, t)| t.due <= now)
            .map(|(id, t)| (t.due, *id))
            .collect();
        fired.sort();

        for (_, id) in &fired {
            let repeat = self.timers.get(id).and_then(|t| t.every);
            match repeat {
                Some(every) => {
                    if let Some(timer) = self.timers.get_mut(id) {
                        while timer.due <= now {
                            timer.due += every;
                        }
                    }
                }
                None => {
                    self.timers.remove(id);
                }
            }
        }

        fired.into_iter().map(|(_, id)| id).collect()
    }

    fn insert(&mut self, due: Instant, every: Option<Duration>) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.insert(id, Timer { due, every });
        id
    }
}
