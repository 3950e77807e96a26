#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod chain;
mod challenge;
mod clock;
mod config;
mod error;
mod events;
mod types;

pub use chain::{AssertionChain, ReadTx, WriteTx};
pub use clock::ChessClock;
pub use config::{
    ProtocolConfig, ASSERTION_STAKE, CHALLENGE_VERTEX_STAKE, DEFAULT_CHALLENGE_PERIOD_SECS,
    DEFAULT_EVENT_CHANNEL_CAPACITY,
};
pub use error::ChainError;
pub use events::{ChainEvent, ChallengeEvent};
pub use types::*;
