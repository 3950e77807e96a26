use async_trait::async_trait;

use crate::merkle::{generate_prefix_proof, MerkleExpansion};
use crate::services::{ExecutionOracle, HistoryChecker};
use crate::{ChallengeType, Hash, HistoryCommitment, StateCommitment};

/// An execution oracle backed by a fixed list of per-step state roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedExecution {
    state_roots: Vec<Hash>,
}

impl SimulatedExecution {
    /// Uses the given roots as the step results `0..len`.
    pub fn new(state_roots: Vec<Hash>) -> Self {
        Self { state_roots }
    }

    /// `num_states` honest roots.
    pub fn honest(num_states: u64) -> Self {
        Self::new((0..num_states).map(Hash::for_u64).collect())
    }

    /// Agrees with [`SimulatedExecution::honest`] below `divergence` and disagrees from there on.
    pub fn diverging_at(num_states: u64, divergence: u64) -> Self {
        let roots = (0..num_states)
            .map(|i| {
                if i < divergence {
                    Hash::for_u64(i)
                } else {
                    Hash::digest(&[b"divergent", &i.to_be_bytes()])
                }
            })
            .collect();
        Self::new(roots)
    }

    /// All step results.
    pub fn state_roots(&self) -> &[Hash] {
        &self.state_roots
    }

    /// State commitment at `height`, if it is within the simulated history.
    pub fn state_commitment(&self, height: u64) -> Option<StateCommitment> {
        let root = self.state_roots.get(usize::try_from(height).ok()?)?;
        Some(StateCommitment::new(height, *root))
    }

    fn range(&self, start: u64, height: u64) -> anyhow::Result<&[Hash]> {
        let end = start
            .checked_add(height)
            .and_then(|end| usize::try_from(end).ok())
            .filter(|end| *end < self.state_roots.len());
        match end {
            Some(end) => Ok(&self.state_roots[start as usize..=end]),
            None => anyhow::bail!(
                "history {start}..={start}+{height} exceeds the {} simulated states",
                self.state_roots.len()
            ),
        }
    }
}

#[async_trait]
impl ExecutionOracle for SimulatedExecution {
    async fn latest_state_commitment(&self) -> anyhow::Result<StateCommitment> {
        let height = (self.state_roots.len() as u64)
            .checked_sub(1)
            .ok_or_else(|| anyhow::anyhow!("no simulated states"))?;
        self.state_commitment(height)
            .ok_or_else(|| anyhow::anyhow!("no state at height {height}"))
    }

    async fn has_state_root(&self, state_root: &Hash) -> anyhow::Result<bool> {
        Ok(self.state_roots.contains(state_root))
    }

    async fn history_commitment(
        &self,
        start: u64,
        height: u64,
    ) -> anyhow::Result<HistoryCommitment> {
        Ok(HistoryCommitment::from_leaves(self.range(start, height)?)?)
    }

    async fn prefix_proof(&self, start: u64, lo: u64, hi: u64) -> anyhow::Result<Vec<Hash>> {
        anyhow::ensure!(lo <= hi, "prefix height {lo} exceeds {hi}");
        let leaves = self.range(start, hi)?;
        let split = lo as usize + 1;
        let prefix = MerkleExpansion::from_leaves(&leaves[..split]);
        Ok(generate_prefix_proof(lo, &prefix, &leaves[split..])?)
    }
}

#[async_trait]
impl HistoryChecker for SimulatedExecution {
    async fn agrees_with_history(
        &self,
        _level: ChallengeType,
        history: &HistoryCommitment,
    ) -> anyhow::Result<bool> {
        match self.range(0, history.height) {
            Ok(leaves) => Ok(HistoryCommitment::from_leaves(leaves)? == *history),
            Err(_) => Ok(false),
        }
    }
}
