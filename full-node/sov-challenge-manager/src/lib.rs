#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod challenge_tree;
mod config;
mod fsm;
mod supervisor;
mod tracker;
mod validator;

pub use challenge_tree::{
    AncestorsWithTimers, Edge, EdgeId, HonestChallengeTree, MutualId, TreeError,
};
pub use config::{from_toml_path, ChallengeManagerConfig, TrackerConfig, ValidatorConfig};
pub use fsm::{Fsm, FsmError, Transition};
pub use supervisor::{DeterministicScheduler, SpawnRequest, TrackerSupervisor};
pub use tracker::{TrackerAction, TrackerContext, TrackerError, TrackerState, VertexTracker};
pub use validator::Validator;
