//! The part of a challenge an honest party agrees with.
//!
//! The tree stores honest edges only. Every edge it is shown, honest or not, still has its
//! creation block recorded under its mutual id so that local timers can account for rivals.

mod ancestors;
mod timers;

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use sov_challenge_interface::services::{HistoryChecker, MetadataReader};
use sov_challenge_interface::{ChallengeType, Hash, HistoryCommitment};
use tracing::debug;

pub use self::ancestors::AncestorsWithTimers;

/// Identifies an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub Hash);

impl Display for EdgeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "edge {}", self.0)
    }
}

/// Shared by rival edges: same level, same origin, same start and same end height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutualId(pub Hash);

/// Snapshot of an edge as the tree sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Identifier.
    pub id: EdgeId,
    /// Challenge level the edge was created in.
    pub level: ChallengeType,
    /// Identifies the challenge the edge belongs to within its level.
    pub origin_id: Hash,
    /// History at the start of the edge's range.
    pub start: HistoryCommitment,
    /// History at the end of the edge's range.
    pub end: HistoryCommitment,
    /// Block the edge was created at.
    pub creation_block: u64,
    /// For level-zero edges, the edge one level up whose outcome this edge decides.
    pub claim_id: Option<EdgeId>,
    /// Child covering the lower half of the range, once bisected.
    pub lower_child: Option<EdgeId>,
    /// Child covering the upper half of the range, once bisected.
    pub upper_child: Option<EdgeId>,
}

impl Edge {
    /// Mutual id of the edge.
    pub fn mutual_id(&self) -> MutualId {
        MutualId(Hash::digest(&[
            &[self.level as u8],
            self.origin_id.as_ref(),
            &self.start.height.to_be_bytes(),
            self.start.merkle.as_ref(),
            &self.end.height.to_be_bytes(),
        ]))
    }

    /// Whether the edge starts a challenge level.
    pub fn is_level_zero(&self) -> bool {
        self.claim_id.is_some()
    }
}

/// Failures of honest challenge tree queries.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The edge is not an honest edge known to the tree.
    #[error("{0} not found in honest challenge tree")]
    NotFound(EdgeId),
    /// No honest level-zero edge with the given origin.
    #[error("no level zero edge with origin id {0}")]
    NoLevelZero(Hash),
    /// No honest block challenge edge is being tracked.
    #[error("no honest block challenge edge being tracked")]
    NoHonestLevelZero,
    /// A level-zero edge without a claim.
    #[error("{0} does not claim any edge")]
    NoClaim(EdgeId),
    /// A bisected edge is missing the child the walk needs.
    #[error("{edge} has no {side} child")]
    MissingChild {
        /// Edge being walked through.
        edge: EdgeId,
        /// `"lower"` or `"upper"`.
        side: &'static str,
    },
    /// The edge disputes a different top-level assertion than this tree.
    #[error("{edge} disputes assertion {found}, tree tracks {expected}")]
    MismatchedAssertion {
        /// The edge.
        edge: EdgeId,
        /// Assertion the tree was built for.
        expected: Hash,
        /// Assertion the edge resolves to.
        found: Hash,
    },
    /// A query about a block before the edge existed.
    #[error("block {block} precedes creation of {edge} at block {created}")]
    BeforeCreation {
        /// The edge.
        edge: EdgeId,
        /// Queried block.
        block: u64,
        /// Creation block.
        created: u64,
    },
    /// The metadata reader failed.
    #[error("metadata reader failed: {0}")]
    Metadata(anyhow::Error),
    /// The history checker failed.
    #[error("history checker failed: {0}")]
    HistoryCheck(anyhow::Error),
}

/// Honest edges of the challenge over one top-level assertion.
pub struct HonestChallengeTree {
    top_level_assertion: Hash,
    metadata: Arc<dyn MetadataReader>,
    checker: Arc<dyn HistoryChecker>,
    edges: HashMap<EdgeId, Edge>,
    mutual_ids: HashMap<MutualId, HashMap<EdgeId, u64>>,
    honest_block_level_zero: Option<EdgeId>,
    honest_level_zero: HashMap<ChallengeType, Vec<EdgeId>>,
}

impl HonestChallengeTree {
    /// An empty tree for the challenge over `top_level_assertion`.
    pub fn new(
        top_level_assertion: Hash,
        metadata: Arc<dyn MetadataReader>,
        checker: Arc<dyn HistoryChecker>,
    ) -> Self {
        Self {
            top_level_assertion,
            metadata,
            checker,
            edges: HashMap::new(),
            mutual_ids: HashMap::new(),
            honest_block_level_zero: None,
            honest_level_zero: HashMap::new(),
        }
    }

    /// Shows the tree an edge seen on the ledger and returns whether the local history agrees
    /// with both of its endpoints.
    ///
    /// Fully agreed edges are stored. Every edge counts towards rivalry. Showing an edge again
    /// refreshes its stored snapshot.
    pub async fn add_edge(&mut self, edge: Edge) -> Result<bool, TreeError> {
        let assertion = self
            .metadata
            .top_level_assertion(&edge.id.0)
            .await
            .map_err(TreeError::Metadata)?;
        if assertion != self.top_level_assertion {
            return Err(TreeError::MismatchedAssertion {
                edge: edge.id,
                expected: self.top_level_assertion,
                found: assertion,
            });
        }
        let agrees_with_start = self
            .checker
            .agrees_with_history(edge.level, &edge.start)
            .await
            .map_err(TreeError::HistoryCheck)?;
        let agrees_with_end = self
            .checker
            .agrees_with_history(edge.level, &edge.end)
            .await
            .map_err(TreeError::HistoryCheck)?;

        self.record_creation(&edge);
        let agrees = agrees_with_start && agrees_with_end;
        debug!(
            edge = %edge.id.0,
            level = %edge.level,
            start = edge.start.height,
            end = edge.end.height,
            agrees,
            "Observed edge"
        );
        if agrees {
            self.store_honest(edge);
        }
        Ok(agrees)
    }

    /// Stores an edge the local party created itself.
    pub fn add_honest_edge(&mut self, edge: Edge) {
        self.record_creation(&edge);
        self.store_honest(edge);
    }

    /// Honest edge by id.
    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    /// Whether the edge is stored as honest.
    pub fn is_honest(&self, id: &EdgeId) -> bool {
        self.edges.contains_key(id)
    }

    fn record_creation(&mut self, edge: &Edge) {
        self.mutual_ids
            .entry(edge.mutual_id())
            .or_default()
            .insert(edge.id, edge.creation_block);
    }

    fn store_honest(&mut self, edge: Edge) {
        if edge.is_level_zero() && !self.edges.contains_key(&edge.id) {
            match edge.level {
                ChallengeType::Block => self.honest_block_level_zero = Some(edge.id),
                level => self.honest_level_zero.entry(level).or_default().push(edge.id),
            }
        }
        self.edges.insert(edge.id, edge);
    }

    fn honest(&self, id: &EdgeId) -> Result<&Edge, TreeError> {
        self.edges.get(id).ok_or(TreeError::NotFound(*id))
    }
}


#[cfg(test)]
mod tests {
    use sov_challenge_interface::mocks::{MockMetadataReader, SimulatedExecution};

    use super::test_utils::*;
    use super::*;

    fn assertion() -> Hash {
        Hash::digest(&[b"assertion"])
    }

    fn history_edge(
        name: &str,
        roots: &[Hash],
        start: u64,
        end: u64,
        created: u64,
        claim: Option<EdgeId>,
    ) -> Edge {
        Edge {
            id: id(name),
            level: ChallengeType::Block,
            origin_id: Hash::ZERO,
            start: HistoryCommitment::from_leaves(&roots[..=start as usize]).unwrap(),
            end: HistoryCommitment::from_leaves(&roots[..=end as usize]).unwrap(),
            creation_block: created,
            claim_id: claim,
            lower_child: None,
            upper_child: None,
        }
    }

    fn simulated_tree(metadata: MockMetadataReader) -> HonestChallengeTree {
        HonestChallengeTree::new(
            assertion(),
            Arc::new(metadata),
            Arc::new(SimulatedExecution::honest(17)),
        )
    }

    #[tokio::test]
    async fn keeps_only_agreed_edges_but_tracks_every_rival() {
        let honest = SimulatedExecution::honest(17);
        let evil = SimulatedExecution::diverging_at(17, 5);
        let claim = Some(id("assertion-claim"));
        let mut tree = simulated_tree(MockMetadataReader::new(assertion()));

        let alice = history_edge("alice-0-16", honest.state_roots(), 0, 16, 1, claim);
        let bob = history_edge("bob-0-16", evil.state_roots(), 0, 16, 2, claim);
        assert_eq!(alice.mutual_id(), bob.mutual_id());

        assert!(tree.add_edge(alice.clone()).await.unwrap());
        assert!(!tree.add_edge(bob.clone()).await.unwrap());
        assert!(tree.is_honest(&alice.id));
        assert!(!tree.is_honest(&bob.id));
        assert_eq!(tree.honest_block_level_zero, Some(alice.id));
        assert_eq!(tree.rivals_with_creation_times(&alice), vec![(bob.id, 2)]);
        assert_eq!(tree.rivals_with_creation_times(&bob), vec![(alice.id, 1)]);

        // Both histories agree up to height 4, so bob's lower half is honest too.
        let shared = history_edge("bob-0-4", evil.state_roots(), 0, 4, 3, None);
        assert!(tree.add_edge(shared.clone()).await.unwrap());
        assert!(tree.is_honest(&shared.id));
        assert_eq!(tree.edge(&shared.id), Some(&shared));
    }

    #[tokio::test]
    async fn rejects_edges_of_other_assertions() {
        let honest = SimulatedExecution::honest(17);
        let edge = history_edge("elsewhere", honest.state_roots(), 0, 16, 1, None);
        let other = Hash::digest(&[b"other assertion"]);
        let metadata = MockMetadataReader::new(assertion()).with_edge_assertion(edge.id.0, other);
        let mut tree = simulated_tree(metadata);

        let err = tree.add_edge(edge.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            TreeError::MismatchedAssertion { found, .. } if found == other
        ));
        assert!(!tree.is_honest(&edge.id));
        assert!(tree.rivals_with_creation_times(&edge).is_empty());
    }

    #[tokio::test]
    async fn own_edges_skip_the_checker() {
        let mut tree = HonestChallengeTree::new(
            assertion(),
            Arc::new(MockMetadataReader::new(assertion())),
            Arc::new(LabelChecker),
        );
        let mut level_zero = edge("big-0.b-16.b", 4);
        level_zero.claim_id = Some(id("blk-4.a-5.a"));

        tree.add_honest_edge(level_zero.clone());
        tree.add_honest_edge(level_zero.clone());
        assert!(tree.is_honest(&level_zero.id));
        assert_eq!(
            tree.honest_level_zero.get(&ChallengeType::BigStep),
            Some(&vec![level_zero.id])
        );
        assert!(tree.rivals_with_creation_times(&level_zero).is_empty());

        // The checker would have refused it.
        let mut copy = level_zero.clone();
        copy.id = id("big-0.b-16.b copy");
        assert!(!tree.add_edge(copy).await.unwrap());
    }
}
