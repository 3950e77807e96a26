#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sov_assertion_chain::{AssertionChain, ChainError, ProtocolConfig};
use sov_challenge_interface::mocks::{ArtificialTimeReference, SimulatedExecution};
use sov_challenge_interface::Address;
use sov_challenge_manager::ValidatorConfig;

pub const PERIOD: Duration = Duration::from_secs(100);
pub const FUNDS: u64 = 1_000_000_000_000;

pub struct Party {
    pub config: ValidatorConfig,
    pub oracle: Arc<SimulatedExecution>,
}

impl Party {
    pub fn alice(num_states: u64) -> Self {
        Self {
            config: ValidatorConfig {
                name: "alice".to_string(),
                address: Address::repeat_byte(0xa1),
            },
            oracle: Arc::new(SimulatedExecution::honest(num_states)),
        }
    }

    /// Disagrees with [`Party::alice`] from step `divergence` on.
    pub fn bob(num_states: u64, divergence: u64) -> Self {
        Self {
            config: ValidatorConfig {
                name: "bob".to_string(),
                address: Address::repeat_byte(0xb0),
            },
            oracle: Arc::new(SimulatedExecution::diverging_at(num_states, divergence)),
        }
    }
}

pub fn setup_chain(parties: &[&Party]) -> (Arc<AssertionChain>, ArtificialTimeReference) {
    let time = ArtificialTimeReference::new();
    let chain = Arc::new(AssertionChain::new(
        ProtocolConfig::with_challenge_period(PERIOD),
        Arc::new(time.clone()),
    ));
    chain
        .tx(|tx| {
            for party in parties {
                tx.set_balance(party.config.address, FUNDS);
            }
            Ok::<_, ChainError>(())
        })
        .unwrap();
    (chain, time)
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
