use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sov_challenge_interface::{Address, HistoryCommitment, StateCommitment};

use crate::{AssertionId, ChallengeId, VertexId};

/// Assertion lifecycle and balance events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum ChainEvent {
    /// A new assertion was created.
    CreateLeaf {
        /// Parent sequence number.
        prev_seq: AssertionId,
        /// Parent state.
        prev_state_commitment: StateCommitment,
        /// New sequence number.
        seq: AssertionId,
        /// Claimed state.
        state_commitment: StateCommitment,
        /// Account that staked on it.
        staker: Address,
    },
    /// An assertion was confirmed.
    Confirm {
        /// Sequence number.
        seq: AssertionId,
    },
    /// An assertion was rejected.
    Reject {
        /// Sequence number.
        seq: AssertionId,
    },
    /// A challenge was opened on an assertion.
    StartChallenge {
        /// The new challenge.
        challenge: ChallengeId,
        /// Contested assertion.
        parent_seq: AssertionId,
        /// Its state.
        parent_state_commitment: StateCommitment,
        /// Its staker, if it still holds a stake.
        parent_staker: Option<Address>,
        /// Account that opened the challenge.
        challenger: Address,
    },
    /// A balance changed.
    SetBalance {
        /// Account.
        addr: Address,
        /// Balance before.
        old_balance: u64,
        /// Balance after.
        new_balance: u64,
    },
}

/// Moves in challenge games.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum ChallengeEvent {
    /// A leaf was added under a challenge's root vertex.
    Leaf {
        /// Challenge.
        challenge: ChallengeId,
        /// The root vertex.
        parent: VertexId,
        /// The new leaf.
        vertex: VertexId,
        /// Sequence number of the leaf within the challenge.
        seq: u64,
        /// Assertion the leaf stands for.
        winner_if_confirmed: AssertionId,
        /// Claimed history.
        history: HistoryCommitment,
        /// Whether the leaf became the root's presumptive successor.
        becomes_ps: bool,
        /// Account that added the leaf.
        validator: Address,
    },
    /// A vertex was bisected.
    Bisect {
        /// Challenge.
        challenge: ChallengeId,
        /// The bisected vertex.
        from: VertexId,
        /// The new midpoint vertex.
        vertex: VertexId,
        /// Sequence number of the midpoint within the challenge.
        seq: u64,
        /// Midpoint history.
        history: HistoryCommitment,
        /// Whether the midpoint became its parent's presumptive successor.
        becomes_ps: bool,
        /// Account that bisected.
        validator: Address,
    },
    /// A vertex was merged into an existing midpoint.
    Merge {
        /// Challenge.
        challenge: ChallengeId,
        /// The re-parented vertex.
        deeper: VertexId,
        /// The vertex it now hangs off.
        shallower: VertexId,
        /// History of the shallower vertex.
        history: HistoryCommitment,
        /// Whether the deeper vertex became the shallower one's presumptive successor.
        becomes_ps: bool,
        /// Account that merged.
        validator: Address,
    },
}
