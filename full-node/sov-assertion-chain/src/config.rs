use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stake locked by each assertion, in gwei.
pub const ASSERTION_STAKE: u64 = 100_000_000_000;
/// Stake locked by each leaf vertex added to a challenge, in gwei.
pub const CHALLENGE_VERTEX_STAKE: u64 = 1_000_000_000;
/// One week.
pub const DEFAULT_CHALLENGE_PERIOD_SECS: u64 = 7 * 24 * 60 * 60;
/// Events buffered per subscriber before the slowest ones start losing events.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Parameters of the challenge protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Length of the challenge period in seconds.
    pub challenge_period_secs: u64,
    /// Stake locked by each assertion.
    #[serde(default = "default_assertion_stake")]
    pub assertion_stake: u64,
    /// Stake locked by each challenge leaf.
    #[serde(default = "default_challenge_vertex_stake")]
    pub challenge_vertex_stake: u64,
    /// Capacity of each event feed.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_assertion_stake() -> u64 {
    ASSERTION_STAKE
}

fn default_challenge_vertex_stake() -> u64 {
    CHALLENGE_VERTEX_STAKE
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

impl ProtocolConfig {
    /// Default stakes with the given challenge period.
    pub fn with_challenge_period(challenge_period: Duration) -> Self {
        Self {
            challenge_period_secs: challenge_period.as_secs(),
            ..Default::default()
        }
    }

    /// The challenge period.
    pub fn challenge_period(&self) -> Duration {
        Duration::from_secs(self.challenge_period_secs)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            challenge_period_secs: DEFAULT_CHALLENGE_PERIOD_SECS,
            assertion_stake: ASSERTION_STAKE,
            challenge_vertex_stake: CHALLENGE_VERTEX_STAKE,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}
