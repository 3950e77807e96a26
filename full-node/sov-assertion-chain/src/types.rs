use std::fmt::{Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sov_challenge_interface::{
    Address, ChallengeType, HistoryCommitment, StateCommitment, Timestamp,
};

use crate::ChessClock;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            BorshSerialize,
            BorshDeserialize,
        )]
        pub struct $name(pub u64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identifies an [`crate::AssertionChain`] instance.
    ChainId,
    "chain"
);
id_type!(
    /// Sequence number of an assertion. Genesis is `0` and numbers are dense.
    AssertionId,
    "assertion"
);
id_type!(
    /// Identifies a challenge within a ledger.
    ChallengeId,
    "challenge"
);
id_type!(
    /// Identifies a vertex within a ledger, across all challenges.
    VertexId,
    "vertex"
);

impl AssertionId {
    /// The genesis assertion.
    pub const GENESIS: AssertionId = AssertionId(0);
}

/// Lifecycle of an assertion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum AssertionStatus {
    /// Neither confirmed nor rejected.
    Pending,
    /// Accepted as the canonical chain.
    Confirmed,
    /// Permanently rejected.
    Rejected,
}

/// Lifecycle of a challenge vertex. Confirmation is final.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum VertexStatus {
    /// Not yet confirmed.
    Pending,
    /// Confirmed.
    Confirmed,
}

/// A staked claim about the chain state.
///
/// `prev` is `None` only for genesis. `staker` is `None` for genesis and after the stake has been
/// handed back, which happens when a different staker builds on this assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    /// Ledger the assertion lives in.
    pub chain_id: ChainId,
    /// Sequence number.
    pub seq: AssertionId,
    /// Claimed state.
    pub state_commitment: StateCommitment,
    /// Account whose stake backs the assertion.
    pub staker: Option<Address>,
    /// Parent assertion.
    pub prev: Option<AssertionId>,
    /// Lifecycle status.
    pub status: AssertionStatus,
    /// Whether this was its parent's first child.
    pub is_first_child: bool,
    /// When the first child was created.
    pub first_child_time: Option<Timestamp>,
    /// When the second child was created. Never set before `first_child_time`.
    pub second_child_time: Option<Timestamp>,
    /// Challenge opened on this assertion.
    pub challenge: Option<ChallengeId>,
}

/// A bisection game over the children of one assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Identifier.
    pub id: ChallengeId,
    /// The contested assertion. Its children are the candidates.
    pub root_assertion: AssertionId,
    /// Zero-height vertex every leaf hangs off initially.
    pub root_vertex: VertexId,
    /// Granularity of the game.
    pub challenge_type: ChallengeType,
    /// Winning child, set once when a leaf vertex is confirmed.
    pub winner: Option<AssertionId>,
    /// When the challenge was opened.
    pub creation_time: Timestamp,
    /// Number of leaves added so far.
    pub leaf_count: u64,
    /// Sequence number the next vertex receives.
    pub next_vertex_seq: u64,
}

/// A finer-grained game opened on a vertex whose children are a single step apart.
///
/// The game itself is played elsewhere. The ledger only records its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubChallenge {
    /// Granularity of the sub-challenge.
    pub challenge_type: ChallengeType,
    /// Vertex whose children are in dispute.
    pub parent_vertex: VertexId,
    /// The child that won, set once.
    pub winner: Option<VertexId>,
}

/// A node in a challenge's bisection tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeVertex {
    /// Identifier.
    pub id: VertexId,
    /// Challenge the vertex belongs to.
    pub challenge: ChallengeId,
    /// Sequence number, unique within the challenge. The root vertex is `0`.
    pub seq: u64,
    /// Account that created the vertex.
    pub validator: Address,
    /// Claimed history.
    pub history: HistoryCommitment,
    /// Parent vertex. `None` only for the root.
    pub prev: Option<VertexId>,
    /// The lowest-height child, if any child exists.
    pub presumptive_successor: Option<VertexId>,
    /// Time spent as presumptive successor.
    pub clock: ChessClock,
    /// Lifecycle status.
    pub status: VertexStatus,
    /// Whether the vertex stands for a whole assertion.
    pub is_leaf: bool,
    /// Assertion that wins the challenge if this leaf is confirmed.
    pub winner_if_confirmed: Option<AssertionId>,
    /// Sub-challenge over this vertex's children.
    pub sub_challenge: Option<SubChallenge>,
}

impl ChallengeVertex {
    /// Whether the vertex is the root of its challenge.
    pub fn is_root(&self) -> bool {
        self.prev.is_none()
    }
}
