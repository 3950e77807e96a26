use super::{Edge, EdgeId, HonestChallengeTree, TreeError};

impl HonestChallengeTree {
    /// Blocks the honest edge went unrivaled, as of `at_block`.
    ///
    /// Zero before the edge existed. Once a rival appears the timer stops at the rival's
    /// creation block.
    pub fn local_timer(&self, id: &EdgeId, at_block: u64) -> Result<u64, TreeError> {
        Ok(self.local_timer_of(self.honest(id)?, at_block))
    }

    pub(super) fn local_timer_of(&self, edge: &Edge, at_block: u64) -> u64 {
        if at_block < edge.creation_block {
            return 0;
        }
        match self.earliest_created_rival_block(edge) {
            Some(rival) if rival <= at_block => rival.saturating_sub(edge.creation_block),
            _ => at_block - edge.creation_block,
        }
    }

    /// Other edges sharing the edge's mutual id, with their creation blocks, oldest first.
    pub fn rivals_with_creation_times(&self, edge: &Edge) -> Vec<(EdgeId, u64)> {
        let mut rivals: Vec<(EdgeId, u64)> = self
            .mutual_ids
            .get(&edge.mutual_id())
            .into_iter()
            .flatten()
            .filter(|(id, _)| **id != edge.id)
            .map(|(id, block)| (*id, *block))
            .collect();
        rivals.sort_by_key(|(id, block)| (*block, *id));
        rivals
    }

    /// Creation block of the edge's oldest rival, if it has any.
    pub fn earliest_created_rival_block(&self, edge: &Edge) -> Option<u64> {
        self.rivals_with_creation_times(edge)
            .first()
            .map(|(_, block)| *block)
    }

    /// Whether the edge had no rival at `block`.
    pub fn unrivaled_at_block(&self, edge: &Edge, block: u64) -> Result<bool, TreeError> {
        if block < edge.creation_block {
            return Err(TreeError::BeforeCreation {
                edge: edge.id,
                block,
                created: edge.creation_block,
            });
        }
        Ok(self
            .earliest_created_rival_block(edge)
            .map_or(true, |rival| rival > block))
    }

    /// Cumulative unrivaled time of an honest edge and all its honest ancestors, plus the time
    /// the top-level assertion went unrivaled. Also returns the ancestors, child to root.
    pub async fn honest_path_timer(
        &self,
        id: &EdgeId,
        at_block: u64,
    ) -> Result<(u64, Vec<EdgeId>), TreeError> {
        let edge = self.honest(id)?;
        let ancestors = self.ancestors_with_timers(id, at_block)?;
        let unrivaled = self.assertion_unrivaled_blocks().await?;
        let timer = ancestors
            .local_timers
            .iter()
            .fold(unrivaled.saturating_add(self.local_timer_of(edge, at_block)), |acc, t| {
                acc.saturating_add(*t)
            });
        Ok((timer, ancestors.ids))
    }

    /// Whether any ancestor's cumulative path timer reaches `challenge_period_blocks`.
    ///
    /// `local_timers` are ordered child to root. Cumulative timers are summed from the root
    /// downwards, starting with the assertion's unrivaled time.
    pub async fn has_confirmable_ancestor(
        &self,
        local_timers: &[u64],
        challenge_period_blocks: u64,
    ) -> Result<bool, TreeError> {
        let Some((root, rest)) = local_timers.split_last() else {
            return Ok(false);
        };
        let mut cumulative = root.saturating_add(self.assertion_unrivaled_blocks().await?);
        if cumulative >= challenge_period_blocks {
            return Ok(true);
        }
        for timer in rest.iter().rev() {
            cumulative = cumulative.saturating_add(*timer);
            if cumulative >= challenge_period_blocks {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn assertion_unrivaled_blocks(&self) -> Result<u64, TreeError> {
        self.metadata
            .assertion_unrivaled_blocks(&self.top_level_assertion)
            .await
            .map_err(TreeError::Metadata)
    }
}
