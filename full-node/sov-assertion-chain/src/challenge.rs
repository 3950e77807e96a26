use std::time::Duration;

use sov_challenge_interface::merkle::verify_prefix_proof;
use sov_challenge_interface::{bisection_point, Address, ChallengeType, Hash, HistoryCommitment};
use tracing::{debug, info};

use crate::chain::{ReadTx, WriteTx};
use crate::{
    AssertionId, AssertionStatus, ChainError, ChainEvent, Challenge, ChallengeEvent, ChallengeId,
    ChallengeVertex, ChessClock, SubChallenge, VertexId, VertexStatus,
};

impl<'a> ReadTx<'a> {
    /// Whether `vertex` is the root or its parent's presumptive successor.
    pub fn is_presumptive_successor(&self, vertex: VertexId) -> Result<bool, ChainError> {
        let v = self.state.vertex(vertex)?;
        match v.prev {
            None => Ok(true),
            Some(prev) => Ok(self.state.vertex(prev)?.presumptive_successor == Some(vertex)),
        }
    }

    /// Whether a new child may still displace the vertex's presumptive successor, i.e. the
    /// successor's clock has not run past the challenge period.
    pub fn eligible_for_new_successor(&self, vertex: VertexId) -> Result<bool, ChainError> {
        match self.state.vertex(vertex)?.presumptive_successor {
            None => Ok(true),
            Some(ps) => Ok(self.ps_timer(ps)? <= self.challenge_period()),
        }
    }

    /// Time on the vertex's chess clock.
    pub fn ps_timer(&self, vertex: VertexId) -> Result<Duration, ChainError> {
        Ok(self.state.vertex(vertex)?.clock.elapsed(self.now))
    }

    /// Height a bisection of `vertex` must land on.
    pub fn required_bisection_height(&self, vertex: VertexId) -> Result<u64, ChainError> {
        let v = self.state.vertex(vertex)?;
        let prev = v
            .prev
            .ok_or(ChainError::InvalidOp("root vertex has no range"))?;
        let prev_height = self.state.vertex(prev)?.history.height;
        Ok(bisection_point(prev_height, v.history.height)?)
    }

    /// Vertices whose parent is `vertex`, in creation order.
    pub fn vertex_children(&self, vertex: VertexId) -> Result<Vec<ChallengeVertex>, ChainError> {
        let challenge = self.state.vertex(vertex)?.challenge;
        Ok(self
            .state
            .vertices
            .iter()
            .filter(|v| v.challenge == challenge && v.prev == Some(vertex))
            .cloned()
            .collect())
    }

    /// Whether another child of the same parent has been confirmed.
    pub fn has_confirmed_sibling(&self, vertex: VertexId) -> Result<bool, ChainError> {
        let v = self.state.vertex(vertex)?;
        let Some(prev) = v.prev else {
            return Ok(false);
        };
        Ok(self.state.vertices.iter().any(|other| {
            other.id != vertex
                && other.challenge == v.challenge
                && other.prev == Some(prev)
                && other.status == VertexStatus::Confirmed
        }))
    }

    /// Whether the challenge has a winner.
    pub fn challenge_completed(&self, challenge: ChallengeId) -> Result<bool, ChainError> {
        Ok(self.state.challenge(challenge)?.winner.is_some())
    }

    /// The winning assertion.
    pub fn challenge_winner(&self, challenge: ChallengeId) -> Result<AssertionId, ChainError> {
        self.state
            .challenge(challenge)?
            .winner
            .ok_or(ChainError::NoWinnerYet)
    }

    /// Sub-challenge opened on a vertex, if any.
    pub fn sub_challenge(&self, vertex: VertexId) -> Result<Option<SubChallenge>, ChainError> {
        Ok(self.state.vertex(vertex)?.sub_challenge.clone())
    }

    /// Whether the children of `parent` have been narrowed to single steps.
    pub fn children_at_one_step_fork(&self, parent: VertexId) -> Result<bool, ChainError> {
        let parent = self.state.vertex(parent)?;
        self.vertices_contain_one_step_fork(parent.challenge, parent.history.hash())
    }

    /// Whether a vertex claiming `vertex_commitment` under a parent claiming
    /// `parent_commitment` is at a one-step fork.
    ///
    /// True when the vertex is one step above its parent and at least two vertices under a
    /// parent with that commitment are each exactly one step above it.
    pub fn is_at_one_step_fork(
        &self,
        challenge: ChallengeId,
        vertex_commitment: &HistoryCommitment,
        parent_commitment: &HistoryCommitment,
    ) -> Result<bool, ChainError> {
        self.state.challenge(challenge)?;
        if parent_commitment.height.checked_add(1) != Some(vertex_commitment.height) {
            return Ok(false);
        }
        self.vertices_contain_one_step_fork(challenge, parent_commitment.hash())
    }

    fn vertices_contain_one_step_fork(
        &self,
        challenge: ChallengeId,
        parent_hash: Hash,
    ) -> Result<bool, ChainError> {
        let mut children = 0usize;
        let mut all_one_step = true;
        for v in self.state.vertices.iter().filter(|v| v.challenge == challenge) {
            let Some(prev) = v.prev else {
                continue;
            };
            let prev = self.state.vertex(prev)?;
            if prev.history.hash() != parent_hash {
                continue;
            }
            children += 1;
            all_one_step &= prev.history.height.checked_add(1) == Some(v.history.height);
        }
        Ok(children >= 2 && all_one_step)
    }

    /// Fails unless [`WriteTx::confirm_for_sub_challenge_win`] would confirm `vertex`.
    pub fn check_sub_challenge_win(&self, vertex: VertexId) -> Result<(), ChainError> {
        let prev = self.confirmable_parent(vertex)?;
        let winner = self
            .state
            .vertex(prev)?
            .sub_challenge
            .as_ref()
            .ok_or(ChainError::InvalidOp("parent has no sub-challenge"))?
            .winner;
        if winner != Some(vertex) {
            return Err(ChainError::InvalidOp("vertex did not win the sub-challenge"));
        }
        Ok(())
    }

    /// Fails unless [`WriteTx::confirm_for_ps_timer`] would confirm `vertex`.
    pub fn check_ps_timer(&self, vertex: VertexId) -> Result<(), ChainError> {
        let prev = self.confirmable_parent(vertex)?;
        if self.state.vertex(prev)?.sub_challenge.is_some() {
            return Err(ChainError::InvalidOp("parent has a sub-challenge"));
        }
        if self.ps_timer(vertex)? <= self.challenge_period() {
            return Err(ChainError::NotYet);
        }
        Ok(())
    }

    /// Fails unless [`WriteTx::confirm_for_challenge_deadline`] would confirm `vertex`.
    pub fn check_challenge_deadline(&self, vertex: VertexId) -> Result<(), ChainError> {
        let prev = self.confirmable_parent(vertex)?;
        let prev_vertex = self.state.vertex(prev)?;
        if prev_vertex.sub_challenge.is_some() {
            return Err(ChainError::InvalidOp("parent has a sub-challenge"));
        }
        if prev_vertex.presumptive_successor != Some(vertex) {
            return Err(ChainError::InvalidOp("vertex is not the presumptive successor"));
        }
        let challenge = self.state.vertex(vertex)?.challenge;
        let deadline = self.state.challenge(challenge)?.creation_time + 2 * self.challenge_period();
        if self.now <= deadline {
            return Err(ChainError::NotYet);
        }
        Ok(())
    }

    /// Checks the preconditions every confirmation rule shares and returns the parent.
    fn confirmable_parent(&self, vertex: VertexId) -> Result<VertexId, ChainError> {
        let v = self.state.vertex(vertex)?;
        if v.status != VertexStatus::Pending {
            return Err(ChainError::WrongState);
        }
        let prev = v
            .prev
            .ok_or(ChainError::InvalidOp("root vertex cannot be confirmed"))?;
        if self.state.vertex(prev)?.status != VertexStatus::Confirmed {
            return Err(ChainError::WrongPredecessorState);
        }
        if v.is_leaf && self.state.challenge(v.challenge)?.winner.is_some() {
            return Err(ChainError::InvalidOp("challenge already has a winner"));
        }
        Ok(prev)
    }
}

impl<'a> WriteTx<'a> {
    /// Opens a challenge on an assertion that has two children.
    pub fn create_challenge(
        &mut self,
        assertion: AssertionId,
        challenger: Address,
    ) -> Result<Challenge, ChainError> {
        let a = self.state.assertion(assertion)?.clone();
        if a.status != AssertionStatus::Pending && self.state.latest_confirmed != assertion {
            return Err(ChainError::WrongState);
        }
        if a.challenge.is_some() {
            return Err(ChainError::ChallengeAlreadyExists);
        }
        if a.second_child_time.is_none() {
            return Err(ChainError::InvalidOp("assertion has no rival children"));
        }
        if a.staker == Some(challenger) {
            return Err(ChainError::CannotChallengeOwnLeaf);
        }

        let id = ChallengeId(self.state.challenges.len() as u64);
        let root_vertex = VertexId(self.state.vertices.len() as u64);
        let root = ChallengeVertex {
            id: root_vertex,
            challenge: id,
            seq: 0,
            validator: challenger,
            history: HistoryCommitment::default(),
            prev: None,
            presumptive_successor: None,
            clock: ChessClock::new(),
            status: VertexStatus::Confirmed,
            is_leaf: false,
            winner_if_confirmed: None,
            sub_challenge: None,
        };
        self.state_mut()
            .vertices_by_history
            .insert((id, root.history.hash()), root_vertex);
        self.state_mut().vertices.push(root);

        let challenge = Challenge {
            id,
            root_assertion: assertion,
            root_vertex,
            challenge_type: ChallengeType::Block,
            winner: None,
            creation_time: self.now,
            leaf_count: 0,
            next_vertex_seq: 1,
        };
        self.state_mut().challenges.push(challenge.clone());
        self.state_mut().assertion_mut(assertion)?.challenge = Some(id);

        info!(
            challenge = id.0,
            assertion = assertion.0,
            %challenger,
            "Started challenge"
        );
        self.emit(ChainEvent::StartChallenge {
            challenge: id,
            parent_seq: assertion,
            parent_state_commitment: a.state_commitment,
            parent_staker: a.staker,
            challenger,
        });
        Ok(challenge)
    }

    /// Adds a leaf for `assertion`, a child of the challenged assertion, under the root vertex.
    ///
    /// `history` must cover the steps from the challenged assertion to `assertion`. If `assertion`
    /// was the first child its clock starts with the time it went unrivaled.
    pub fn add_leaf(
        &mut self,
        challenge: ChallengeId,
        assertion: AssertionId,
        history: HistoryCommitment,
        validator: Address,
    ) -> Result<ChallengeVertex, ChainError> {
        let c = self.state.challenge(challenge)?.clone();
        let a = self.state.assertion(assertion)?.clone();
        if a.prev != Some(c.root_assertion) {
            return Err(ChainError::InvalidOp(
                "assertion is not a child of the challenged assertion",
            ));
        }
        if c.winner.is_some() {
            return Err(ChainError::WrongState);
        }
        if !self.view().eligible_for_new_successor(c.root_vertex)? {
            return Err(ChainError::PastDeadline);
        }
        if self.is_included(challenge, &history) {
            return Err(ChainError::AlreadyExists);
        }
        let root_assertion = self.state.assertion(c.root_assertion)?.clone();
        let expected = a.state_commitment.height - root_assertion.state_commitment.height;
        if history.height != expected {
            return Err(ChainError::InvalidHeight {
                expected,
                actual: history.height,
            });
        }
        self.deduct_from_balance(validator, self.chain.config().challenge_vertex_stake)?;

        let clock = match (
            a.is_first_child,
            root_assertion.first_child_time,
            root_assertion.second_child_time,
        ) {
            (true, Some(first), Some(second)) => {
                ChessClock::preloaded(second.saturating_duration_since(first))
            }
            _ => ChessClock::new(),
        };
        let seq = self.next_vertex_seq(challenge)?;
        self.state_mut().challenge_mut(challenge)?.leaf_count += 1;

        let id = VertexId(self.state.vertices.len() as u64);
        let leaf = ChallengeVertex {
            id,
            challenge,
            seq,
            validator,
            history,
            prev: Some(c.root_vertex),
            presumptive_successor: None,
            clock,
            status: VertexStatus::Pending,
            is_leaf: true,
            winner_if_confirmed: Some(assertion),
            sub_challenge: None,
        };
        self.insert_vertex(leaf);
        self.maybe_new_presumptive_successor(c.root_vertex, id)?;

        let becomes_ps = self.state.vertex(c.root_vertex)?.presumptive_successor == Some(id);
        debug!(
            challenge = challenge.0,
            vertex = id.0,
            height = history.height,
            becomes_ps,
            "Added challenge leaf"
        );
        self.emit_challenge(ChallengeEvent::Leaf {
            challenge,
            parent: c.root_vertex,
            vertex: id,
            seq,
            winner_if_confirmed: assertion,
            history,
            becomes_ps,
            validator,
        });
        self.state.vertex(id).cloned()
    }

    /// Splits the range between `vertex` and its parent at the mandated bisection point.
    ///
    /// The new midpoint vertex takes over `vertex`'s parent and a copy of its clock, and `vertex`
    /// moves under the midpoint. `proof` shows `history` is a prefix of `vertex`'s history.
    pub fn bisect(
        &mut self,
        vertex: VertexId,
        history: HistoryCommitment,
        proof: &[Hash],
        validator: Address,
    ) -> Result<ChallengeVertex, ChainError> {
        let v = self.state.vertex(vertex)?.clone();
        let prev = v
            .prev
            .ok_or(ChainError::InvalidOp("cannot bisect the root vertex"))?;
        if self.view().is_presumptive_successor(vertex)? {
            return Err(ChainError::WrongState);
        }
        if !self.view().eligible_for_new_successor(prev)? {
            return Err(ChainError::PastDeadline);
        }
        if self.is_included(v.challenge, &history) {
            return Err(ChainError::AlreadyExists);
        }
        let expected = bisection_point(self.state.vertex(prev)?.history.height, v.history.height)?;
        if history.height != expected {
            return Err(ChainError::InvalidHeight {
                expected,
                actual: history.height,
            });
        }
        verify_prefix_proof(&history, &v.history, proof)?;

        let now = self.now;
        self.state_mut().vertex_mut(vertex)?.clock.stop(now);
        let clock = self.state.vertex(vertex)?.clock;
        let seq = self.next_vertex_seq(v.challenge)?;
        let id = VertexId(self.state.vertices.len() as u64);
        self.insert_vertex(ChallengeVertex {
            id,
            challenge: v.challenge,
            seq,
            validator,
            history,
            prev: Some(prev),
            presumptive_successor: None,
            clock,
            status: VertexStatus::Pending,
            is_leaf: false,
            winner_if_confirmed: None,
            sub_challenge: None,
        });
        self.maybe_new_presumptive_successor(id, vertex)?;
        self.maybe_new_presumptive_successor(prev, id)?;
        self.state_mut().vertex_mut(vertex)?.prev = Some(id);

        let becomes_ps = self.state.vertex(prev)?.presumptive_successor == Some(id);
        debug!(
            challenge = v.challenge.0,
            from = vertex.0,
            vertex = id.0,
            height = history.height,
            becomes_ps,
            "Bisected challenge vertex"
        );
        self.emit_challenge(ChallengeEvent::Bisect {
            challenge: v.challenge,
            from: vertex,
            vertex: id,
            seq,
            history,
            becomes_ps,
            validator,
        });
        self.state.vertex(id).cloned()
    }

    /// Moves `vertex` under `target`, an existing vertex at the mandated bisection point of
    /// `vertex`'s range. `target` is credited with `vertex`'s clock time.
    ///
    /// `target` may have been re-parented by later bisections. If `vertex` was the presumptive
    /// successor of its old parent, the parent's lowest remaining child takes its place.
    pub fn merge(
        &mut self,
        vertex: VertexId,
        target: VertexId,
        proof: &[Hash],
        validator: Address,
    ) -> Result<ChallengeVertex, ChainError> {
        let v = self.state.vertex(vertex)?.clone();
        let t = self.state.vertex(target)?.clone();
        let prev = v
            .prev
            .ok_or(ChainError::InvalidOp("cannot merge the root vertex"))?;
        if t.challenge != v.challenge {
            return Err(ChainError::InvalidOp("merge target is in another challenge"));
        }
        if !self.view().eligible_for_new_successor(target)? {
            return Err(ChainError::PastDeadline);
        }
        let expected = bisection_point(self.state.vertex(prev)?.history.height, v.history.height)?;
        if t.history.height != expected {
            return Err(ChainError::InvalidHeight {
                expected,
                actual: t.history.height,
            });
        }
        verify_prefix_proof(&t.history, &v.history, proof)?;

        let now = self.now;
        let was_ps = self.state.vertex(prev)?.presumptive_successor == Some(vertex);
        let credit = v.clock.elapsed(now);
        let moved = self.state_mut().vertex_mut(vertex)?;
        moved.prev = Some(target);
        moved.clock.stop(now);
        if was_ps {
            self.state_mut().vertex_mut(prev)?.presumptive_successor = None;
            self.elect_presumptive_successor(prev)?;
        }
        self.state_mut().vertex_mut(target)?.clock.add(credit);
        self.maybe_new_presumptive_successor(target, vertex)?;

        let becomes_ps = self.state.vertex(target)?.presumptive_successor == Some(vertex);
        debug!(
            challenge = v.challenge.0,
            deeper = vertex.0,
            shallower = target.0,
            old_parent = prev.0,
            becomes_ps,
            "Merged challenge vertex"
        );
        self.emit_challenge(ChallengeEvent::Merge {
            challenge: v.challenge,
            deeper: vertex,
            shallower: target,
            history: t.history,
            becomes_ps,
            validator,
        });
        self.state.vertex(target).cloned()
    }

    /// Opens a sub-challenge over the children of a pending vertex.
    pub fn create_sub_challenge(&mut self, vertex: VertexId) -> Result<SubChallenge, ChainError> {
        let v = self.state.vertex(vertex)?;
        if v.sub_challenge.is_some() {
            return Err(ChainError::AlreadyExists);
        }
        if v.status == VertexStatus::Confirmed {
            return Err(ChainError::WrongState);
        }
        let challenge_type = self
            .state
            .challenge(v.challenge)?
            .challenge_type
            .next_level()
            .ok_or(ChainError::InvalidOp(
                "small step challenges cannot be subdivided",
            ))?;
        let sub_challenge = SubChallenge {
            challenge_type,
            parent_vertex: vertex,
            winner: None,
        };
        self.state_mut().vertex_mut(vertex)?.sub_challenge = Some(sub_challenge.clone());
        info!(vertex = vertex.0, %challenge_type, "Opened sub-challenge");
        Ok(sub_challenge)
    }

    /// Records the outcome of the sub-challenge opened on `parent`.
    pub fn set_sub_challenge_winner(
        &mut self,
        parent: VertexId,
        winner: VertexId,
    ) -> Result<(), ChainError> {
        let sub_challenge = self
            .state
            .vertex(parent)?
            .sub_challenge
            .as_ref()
            .ok_or(ChainError::InvalidOp("vertex has no sub-challenge"))?;
        if sub_challenge.winner.is_some() {
            return Err(ChainError::InvalidOp("sub-challenge already has a winner"));
        }
        if self.state.vertex(winner)?.prev != Some(parent) {
            return Err(ChainError::InvalidOp(
                "sub-challenge winner must be a child of its parent vertex",
            ));
        }
        if let Some(sub_challenge) = self.state_mut().vertex_mut(parent)?.sub_challenge.as_mut() {
            sub_challenge.winner = Some(winner);
        }
        info!(parent = parent.0, winner = winner.0, "Decided sub-challenge");
        Ok(())
    }

    /// Confirms the vertex its parent's sub-challenge named as winner.
    pub fn confirm_for_sub_challenge_win(&mut self, vertex: VertexId) -> Result<(), ChainError> {
        self.view().check_sub_challenge_win(vertex)?;
        self.confirm_vertex(vertex)
    }

    /// Confirms a vertex whose chess clock has run past the challenge period.
    pub fn confirm_for_ps_timer(&mut self, vertex: VertexId) -> Result<(), ChainError> {
        self.view().check_ps_timer(vertex)?;
        self.confirm_vertex(vertex)
    }

    /// Confirms its parent's presumptive successor once twice the challenge period has passed
    /// since the challenge opened.
    pub fn confirm_for_challenge_deadline(&mut self, vertex: VertexId) -> Result<(), ChainError> {
        self.view().check_challenge_deadline(vertex)?;
        self.confirm_vertex(vertex)
    }

    fn confirm_vertex(&mut self, vertex: VertexId) -> Result<(), ChainError> {
        let v = self.state.vertex(vertex)?.clone();
        if v.is_leaf {
            let challenge = self.state.challenge(v.challenge)?;
            let stake = self.chain.config().challenge_vertex_stake;
            let refund = stake.saturating_mul(challenge.leaf_count + 1) / 2;
            self.state_mut().challenge_mut(v.challenge)?.winner = v.winner_if_confirmed;
            self.add_to_balance(v.validator, refund);
        }
        let now = self.now;
        let confirmed = self.state_mut().vertex_mut(vertex)?;
        confirmed.status = VertexStatus::Confirmed;
        confirmed.clock.stop(now);
        info!(
            challenge = v.challenge.0,
            vertex = vertex.0,
            height = v.history.height,
            is_leaf = v.is_leaf,
            "Confirmed challenge vertex"
        );
        Ok(())
    }

    /// Makes `successor` the presumptive successor of `parent` if it is lower than the current
    /// one, or if there is none. A displaced successor's clock stops.
    fn maybe_new_presumptive_successor(
        &mut self,
        parent: VertexId,
        successor: VertexId,
    ) -> Result<(), ChainError> {
        let now = self.now;
        let height = self.state.vertex(successor)?.history.height;
        let current = self.state.vertex(parent)?.presumptive_successor;
        if let Some(current) = current {
            let current_vertex = self.state_mut().vertex_mut(current)?;
            if height < current_vertex.history.height {
                current_vertex.clock.stop(now);
                self.state_mut().vertex_mut(parent)?.presumptive_successor = None;
            }
        }
        let parent_vertex = self.state_mut().vertex_mut(parent)?;
        if parent_vertex.presumptive_successor.is_none() {
            parent_vertex.presumptive_successor = Some(successor);
            self.state_mut().vertex_mut(successor)?.clock.start(now);
        }
        Ok(())
    }

    /// Picks the lowest pending child of `parent`, earliest first on ties, as its presumptive
    /// successor.
    fn elect_presumptive_successor(&mut self, parent: VertexId) -> Result<(), ChainError> {
        let lowest = self
            .state
            .vertices
            .iter()
            .filter(|c| c.prev == Some(parent) && c.status == VertexStatus::Pending)
            .min_by_key(|c| (c.history.height, c.id))
            .map(|c| c.id);
        if let Some(successor) = lowest {
            self.maybe_new_presumptive_successor(parent, successor)?;
        }
        Ok(())
    }

    fn is_included(&self, challenge: ChallengeId, history: &HistoryCommitment) -> bool {
        self.state
            .vertices_by_history
            .contains_key(&(challenge, history.hash()))
    }

    fn next_vertex_seq(&mut self, challenge: ChallengeId) -> Result<u64, ChainError> {
        let c = self.state_mut().challenge_mut(challenge)?;
        let seq = c.next_vertex_seq;
        c.next_vertex_seq += 1;
        Ok(seq)
    }

    fn insert_vertex(&mut self, vertex: ChallengeVertex) {
        self.state_mut()
            .vertices_by_history
            .insert((vertex.challenge, vertex.history.hash()), vertex.id);
        self.state_mut().vertices.push(vertex);
    }
}
