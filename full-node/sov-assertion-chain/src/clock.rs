use std::time::Duration;

use sov_challenge_interface::Timestamp;

/// Accumulates the time a vertex spends as its parent's presumptive successor.
///
/// The clock does not read time on its own. Callers pass the current time to every operation,
/// so a ledger transaction sees a single consistent instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChessClock {
    accumulated: Duration,
    running_since: Option<Timestamp>,
}

impl ChessClock {
    /// A stopped clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A stopped clock that already shows `elapsed`.
    pub fn preloaded(elapsed: Duration) -> Self {
        Self {
            accumulated: elapsed,
            running_since: None,
        }
    }

    /// Starts the clock. Starting a running clock has no effect.
    pub fn start(&mut self, now: Timestamp) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    /// Stops the clock, banking the time since it was started.
    pub fn stop(&mut self, now: Timestamp) {
        if let Some(since) = self.running_since.take() {
            self.accumulated = self
                .accumulated
                .saturating_add(now.saturating_duration_since(since));
        }
    }

    /// Adds time without changing whether the clock runs.
    pub fn add(&mut self, extra: Duration) {
        self.accumulated = self.accumulated.saturating_add(extra);
    }

    /// Total time on the clock at `now`.
    pub fn elapsed(&self, now: Timestamp) -> Duration {
        match self.running_since {
            Some(since) => self
                .accumulated
                .saturating_add(now.saturating_duration_since(since)),
            None => self.accumulated,
        }
    }

    /// Whether the clock is running.
    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }
}
