use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use sov_assertion_chain::ProtocolConfig;
use sov_challenge_interface::Address;

const DEFAULT_ACT_EVERY_MS: u64 = 1_000;
const DEFAULT_MAX_CONCURRENT_TRACKERS: usize = 64;

/// Identity of the local validator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValidatorConfig {
    /// Name used in log lines.
    pub name: String,
    /// Account that stakes and makes moves.
    pub address: Address,
}

/// How vertex trackers are scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackerConfig {
    /// Interval between two wake-ups of a tracker, in milliseconds.
    #[serde(default = "default_act_every_ms")]
    pub act_every_ms: u64,
    /// Upper bound on trackers running at once.
    #[serde(default = "default_max_concurrent_trackers")]
    pub max_concurrent_trackers: usize,
}

fn default_act_every_ms() -> u64 {
    DEFAULT_ACT_EVERY_MS
}

fn default_max_concurrent_trackers() -> usize {
    DEFAULT_MAX_CONCURRENT_TRACKERS
}

impl TrackerConfig {
    /// Wake-up interval.
    pub fn act_every(&self) -> Duration {
        Duration::from_millis(self.act_every_ms)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            act_every_ms: DEFAULT_ACT_EVERY_MS,
            max_concurrent_trackers: DEFAULT_MAX_CONCURRENT_TRACKERS,
        }
    }
}

/// Challenge manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChallengeManagerConfig {
    /// Local validator.
    pub validator: ValidatorConfig,
    /// Tracker scheduling.
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Protocol parameters the ledger runs with.
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Reads toml file as a specific type.
pub fn from_toml_path<P: AsRef<Path>, R: DeserializeOwned>(path: P) -> anyhow::Result<R> {
    let mut contents = String::new();
    {
        let mut file = File::open(path)?;
        file.read_to_string(&mut contents)?;
    }

    let result: R = toml::from_str(&contents)?;

    Ok(result)
}
