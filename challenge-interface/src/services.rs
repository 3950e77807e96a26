//! Interfaces to components that live outside the challenge protocol.
//!
//! All of them are asynchronous and report failures as [`anyhow::Error`]. A failing
//! collaborator is an infrastructure problem: callers log it and retry later.

use async_trait::async_trait;

use crate::{ChallengeType, Hash, HistoryCommitment, StateCommitment};

/// Local execution of the chain, used to build commitments and proofs about the honest history.
///
/// Histories are addressed relative to a starting step: `history_commitment(start, height)`
/// commits to the `height + 1` step results beginning at `start`.
#[async_trait]
pub trait ExecutionOracle: Send + Sync {
    /// The most recent state this node has computed.
    async fn latest_state_commitment(&self) -> anyhow::Result<StateCommitment>;

    /// Whether `state_root` appears anywhere in the local history.
    async fn has_state_root(&self, state_root: &Hash) -> anyhow::Result<bool>;

    /// Commitment to the step results `start..=start + height`.
    async fn history_commitment(&self, start: u64, height: u64)
        -> anyhow::Result<HistoryCommitment>;

    /// Proof that the history of height `lo` starting at `start` is a prefix of the history
    /// of height `hi` starting at the same step.
    async fn prefix_proof(&self, start: u64, lo: u64, hi: u64) -> anyhow::Result<Vec<Hash>>;
}

/// Decides whether a commitment made by some party matches local history.
#[async_trait]
pub trait HistoryChecker: Send + Sync {
    /// True if `history` is what this node would have committed to at `level`.
    async fn agrees_with_history(
        &self,
        level: ChallengeType,
        history: &HistoryCommitment,
    ) -> anyhow::Result<bool>;
}

/// Resolves protocol metadata that the honest challenge tree cannot compute on its own.
#[async_trait]
pub trait MetadataReader: Send + Sync {
    /// The top-level assertion the edge ultimately disputes.
    async fn top_level_assertion(&self, edge_id: &Hash) -> anyhow::Result<Hash>;

    /// How many blocks the assertion went without a rival.
    async fn assertion_unrivaled_blocks(&self, assertion_id: &Hash) -> anyhow::Result<u64>;
}
