use sov_challenge_interface::{bisection_point, ChallengeType};

use super::{Edge, EdgeId, HonestChallengeTree, TreeError};

/// Honest ancestors of an edge, ordered from child to root, next to their local timers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AncestorsWithTimers {
    /// Ancestor ids.
    pub ids: Vec<EdgeId>,
    /// Local timer of each ancestor, in the same order.
    pub local_timers: Vec<u64>,
}

impl HonestChallengeTree {
    /// Honest ancestors of an honest edge, from its parent up to the block challenge's
    /// level-zero edge.
    ///
    /// Crossing from a sub-challenge into the level above goes through the edge the
    /// sub-challenge's level-zero edge claims, which is part of the result.
    pub fn ancestors_for_honest_edge(&self, id: &EdgeId) -> Result<Vec<EdgeId>, TreeError> {
        Ok(self.ancestor_edges(id)?.iter().map(|e| e.id).collect())
    }

    /// [`HonestChallengeTree::ancestors_for_honest_edge`] together with each ancestor's local
    /// timer at `at_block`.
    pub fn ancestors_with_timers(
        &self,
        id: &EdgeId,
        at_block: u64,
    ) -> Result<AncestorsWithTimers, TreeError> {
        let edges = self.ancestor_edges(id)?;
        Ok(AncestorsWithTimers {
            ids: edges.iter().map(|e| e.id).collect(),
            local_timers: edges
                .iter()
                .map(|e| self.local_timer_of(e, at_block))
                .collect(),
        })
    }

    fn ancestor_edges(&self, id: &EdgeId) -> Result<Vec<&Edge>, TreeError> {
        let mut ancestry = Vec::new();
        let mut current = self.honest(id)?;
        loop {
            let root = self.level_zero_for(current)?;
            let mut path = self.path_within_level(root, current)?;
            path.reverse();
            ancestry.extend(path);
            if root.level == ChallengeType::Block {
                return Ok(ancestry);
            }
            let claim = root.claim_id.ok_or(TreeError::NoClaim(root.id))?;
            let claimed = self.honest(&claim)?;
            // Each hop must climb one level, or a bad claim could loop forever.
            if root.level.prev_level() != Some(claimed.level) {
                return Err(TreeError::NoClaim(root.id));
            }
            ancestry.push(claimed);
            current = claimed;
        }
    }

    fn level_zero_for(&self, edge: &Edge) -> Result<&Edge, TreeError> {
        match edge.level {
            ChallengeType::Block => {
                let id = self
                    .honest_block_level_zero
                    .ok_or(TreeError::NoHonestLevelZero)?;
                self.honest(&id)
            }
            level => self
                .honest_level_zero
                .get(&level)
                .into_iter()
                .flatten()
                .filter_map(|id| self.edges.get(id))
                .find(|e| e.origin_id == edge.origin_id)
                .ok_or(TreeError::NoLevelZero(edge.origin_id)),
        }
    }

    /// Edges visited walking from `root` down to `target`, root first, `target` excluded.
    fn path_within_level<'a>(
        &'a self,
        root: &'a Edge,
        target: &Edge,
    ) -> Result<Vec<&'a Edge>, TreeError> {
        let mut path = Vec::new();
        let mut cursor = root;
        while cursor.id != target.id {
            path.push(cursor);
            // A single-step edge has no children, so the target is not below it.
            let mid = bisection_point(cursor.start.height, cursor.end.height)
                .map_err(|_| TreeError::NotFound(target.id))?;
            let (child, side) = if target.start.height < mid {
                (cursor.lower_child, "lower")
            } else {
                (cursor.upper_child, "upper")
            };
            let child = child.ok_or(TreeError::MissingChild {
                edge: cursor.id,
                side,
            })?;
            cursor = self.honest(&child)?;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sov_challenge_interface::mocks::MockMetadataReader;
    use sov_challenge_interface::Hash;

    use super::super::test_utils::*;
    use super::*;

    const HONEST: [&str; 9] = [
        "0.a-16.a", "0.a-8.a", "8.a-16.a", "0.a-4.a", "4.a-8.a", "4.a-6.a", "6.a-8.a", "4.a-5.a",
        "5.a-6.a",
    ];
    const EVIL: [&str; 8] = [
        "0.a-16.b", "0.a-8.b", "8.b-16.b", "4.a-8.b", "4.a-6.b", "6.b-8.b", "4.a-5.b", "5.b-6.b",
    ];

    /// Alice and bob agree up to height 4 at every level:
    ///
    /// ```text
    ///       /--5---6-----8-----------16 = alice
    /// 0-----4
    ///       \--5'--6'----8'----------16' = bob
    /// ```
    ///
    /// The big step challenge is over `blk-4.a-5.a` and the small step challenge over
    /// `big-4.a-5.a`.
    async fn three_level_tree() -> HonestChallengeTree {
        let assertion = Hash::digest(&[b"assertion"]);
        let mut tree = HonestChallengeTree::new(
            assertion,
            Arc::new(MockMetadataReader::new(assertion)),
            Arc::new(LabelChecker),
        );
        let levels = [
            ("blk", Hash::ZERO, Some(id("assertion"))),
            ("big", id("blk-4.a-5.a").0, Some(id("blk-4.a-5.a"))),
            ("smol", id("big-4.a-5.a").0, Some(id("big-4.a-5.a"))),
        ];
        for (prefix, origin, claim) in levels {
            let names: Vec<String> = HONEST
                .iter()
                .chain(EVIL.iter())
                .map(|range| format!("{prefix}-{range}"))
                .collect();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let mut edges: Vec<Edge> = names.iter().map(|n| edge(n, 1)).collect();
            link(&mut edges, &names);
            for mut e in edges {
                e.origin_id = origin;
                if e.start.height == 0 && e.end.height == 16 {
                    e.claim_id = claim;
                }
                tree.add_edge(e).await.unwrap();
            }
        }
        tree
    }

    fn ids(names: &[&str]) -> Vec<EdgeId> {
        names.iter().map(|n| id(n)).collect()
    }

    #[tokio::test]
    async fn unknown_and_dishonest_edges_are_not_found() {
        let tree = three_level_tree().await;
        assert!(matches!(
            tree.ancestors_for_honest_edge(&id("foo")),
            Err(TreeError::NotFound(_))
        ));
        assert!(matches!(
            tree.ancestors_for_honest_edge(&id("blk-0.a-16.b")),
            Err(TreeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn block_challenge_ancestors() {
        let tree = three_level_tree().await;
        assert!(tree
            .ancestors_for_honest_edge(&id("blk-0.a-16.a"))
            .unwrap()
            .is_empty());
        assert_eq!(
            tree.ancestors_for_honest_edge(&id("blk-0.a-8.a")).unwrap(),
            ids(&["blk-0.a-16.a"])
        );
        assert_eq!(
            tree.ancestors_for_honest_edge(&id("blk-8.a-16.a")).unwrap(),
            ids(&["blk-0.a-16.a"])
        );
        assert_eq!(
            tree.ancestors_for_honest_edge(&id("blk-4.a-5.a")).unwrap(),
            ids(&["blk-4.a-6.a", "blk-4.a-8.a", "blk-0.a-8.a", "blk-0.a-16.a"])
        );
    }

    #[tokio::test]
    async fn sub_challenge_ancestors_climb_through_claims() {
        let tree = three_level_tree().await;
        assert_eq!(
            tree.ancestors_for_honest_edge(&id("big-0.a-16.a")).unwrap(),
            ids(&[
                "blk-4.a-5.a",
                "blk-4.a-6.a",
                "blk-4.a-8.a",
                "blk-0.a-8.a",
                "blk-0.a-16.a",
            ])
        );
        assert_eq!(
            tree.ancestors_for_honest_edge(&id("smol-5.a-6.a")).unwrap(),
            ids(&[
                "smol-4.a-6.a",
                "smol-4.a-8.a",
                "smol-0.a-8.a",
                "smol-0.a-16.a",
                "big-4.a-5.a",
                "big-4.a-6.a",
                "big-4.a-8.a",
                "big-0.a-8.a",
                "big-0.a-16.a",
                "blk-4.a-5.a",
                "blk-4.a-6.a",
                "blk-4.a-8.a",
                "blk-0.a-8.a",
                "blk-0.a-16.a",
            ])
        );
    }

    #[tokio::test]
    async fn edges_off_the_bisection_path_are_not_found() {
        let mut tree = three_level_tree().await;
        let stray = edge("blk-4.a-7.a", 1);
        let stray_id = stray.id;
        tree.add_honest_edge(stray);
        assert!(matches!(
            tree.ancestors_for_honest_edge(&stray_id),
            Err(TreeError::NotFound(id)) if id == stray_id
        ));
    }

    #[tokio::test]
    async fn sub_challenge_without_level_zero_edge() {
        let mut tree = three_level_tree().await;
        let mut orphan = edge("big-0.a-2.a", 1);
        orphan.origin_id = Hash::digest(&[b"unknown origin"]);
        let orphan_id = orphan.id;
        tree.add_honest_edge(orphan);
        assert!(matches!(
            tree.ancestors_for_honest_edge(&orphan_id),
            Err(TreeError::NoLevelZero(origin)) if origin == Hash::digest(&[b"unknown origin"])
        ));
    }

    #[test]
    fn block_edges_need_an_honest_level_zero_edge() {
        let assertion = Hash::digest(&[b"assertion"]);
        let mut tree = HonestChallengeTree::new(
            assertion,
            Arc::new(MockMetadataReader::new(assertion)),
            Arc::new(LabelChecker),
        );
        tree.add_honest_edge(edge("blk-0.a-8.a", 1));
        assert!(matches!(
            tree.ancestors_for_honest_edge(&id("blk-0.a-8.a")),
            Err(TreeError::NoHonestLevelZero)
        ));
    }
}
