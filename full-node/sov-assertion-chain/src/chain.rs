use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use sov_challenge_interface::{
    Address, Hash, HistoryCommitment, StateCommitment, TimeReference, Timestamp,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    Assertion, AssertionId, AssertionStatus, ChainError, ChainEvent, ChainId, Challenge,
    ChallengeEvent, ChallengeId, ChallengeVertex, ProtocolConfig, VertexId,
};

static NEXT_CHAIN_ID: AtomicU64 = AtomicU64::new(0);

/// Everything the ledger knows. Write transactions copy it on their first mutation and swap the
/// copy in on success.
#[derive(Debug, Clone)]
pub(crate) struct ChainState {
    pub(crate) assertions: Vec<Assertion>,
    /// Keyed on hash(commitment hash ‖ parent sequence number).
    pub(crate) seen: HashSet<Hash>,
    pub(crate) latest_confirmed: AssertionId,
    pub(crate) balances: HashMap<Address, u64>,
    pub(crate) challenges: Vec<Challenge>,
    pub(crate) vertices: Vec<ChallengeVertex>,
    /// Doubles as the set of history commitments already included in each challenge.
    pub(crate) vertices_by_history: HashMap<(ChallengeId, Hash), VertexId>,
}

impl ChainState {
    fn genesis(chain_id: ChainId) -> Self {
        let genesis = Assertion {
            chain_id,
            seq: AssertionId::GENESIS,
            state_commitment: StateCommitment::default(),
            staker: None,
            prev: None,
            status: AssertionStatus::Confirmed,
            is_first_child: false,
            first_child_time: None,
            second_child_time: None,
            challenge: None,
        };
        Self {
            assertions: vec![genesis],
            seen: HashSet::new(),
            latest_confirmed: AssertionId::GENESIS,
            balances: HashMap::new(),
            challenges: Vec::new(),
            vertices: Vec::new(),
            vertices_by_history: HashMap::new(),
        }
    }

    pub(crate) fn assertion(&self, id: AssertionId) -> Result<&Assertion, ChainError> {
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| self.assertions.get(idx))
            .ok_or(ChainError::NotFound {
                kind: "assertion",
                id: id.0,
            })
    }

    pub(crate) fn assertion_mut(&mut self, id: AssertionId) -> Result<&mut Assertion, ChainError> {
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| self.assertions.get_mut(idx))
            .ok_or(ChainError::NotFound {
                kind: "assertion",
                id: id.0,
            })
    }

    pub(crate) fn challenge(&self, id: ChallengeId) -> Result<&Challenge, ChainError> {
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| self.challenges.get(idx))
            .ok_or(ChainError::NotFound {
                kind: "challenge",
                id: id.0,
            })
    }

    pub(crate) fn challenge_mut(&mut self, id: ChallengeId) -> Result<&mut Challenge, ChainError> {
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| self.challenges.get_mut(idx))
            .ok_or(ChainError::NotFound {
                kind: "challenge",
                id: id.0,
            })
    }

    pub(crate) fn vertex(&self, id: VertexId) -> Result<&ChallengeVertex, ChainError> {
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| self.vertices.get(idx))
            .ok_or(ChainError::NotFound {
                kind: "vertex",
                id: id.0,
            })
    }

    pub(crate) fn vertex_mut(&mut self, id: VertexId) -> Result<&mut ChallengeVertex, ChainError> {
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| self.vertices.get_mut(idx))
            .ok_or(ChainError::NotFound {
                kind: "vertex",
                id: id.0,
            })
    }

    pub(crate) fn balance(&self, addr: &Address) -> u64 {
        self.balances.get(addr).copied().unwrap_or_default()
    }
}

/// The ledger of assertions, challenges and balances.
///
/// Reads go through [`AssertionChain::call`], writes through [`AssertionChain::tx`]. Any number
/// of reads may run at once. A write excludes every other transaction.
pub struct AssertionChain {
    id: ChainId,
    config: ProtocolConfig,
    time: Arc<dyn TimeReference>,
    state: RwLock<ChainState>,
    chain_events: broadcast::Sender<ChainEvent>,
    challenge_events: broadcast::Sender<ChallengeEvent>,
}

impl AssertionChain {
    /// Creates a ledger holding only the confirmed genesis assertion.
    pub fn new(config: ProtocolConfig, time: Arc<dyn TimeReference>) -> Self {
        let id = ChainId(NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed));
        let capacity = config.event_channel_capacity.max(1);
        let (chain_events, _) = broadcast::channel(capacity);
        let (challenge_events, _) = broadcast::channel(capacity);
        info!(
            chain_id = id.0,
            challenge_period_secs = config.challenge_period_secs,
            "Created assertion chain"
        );
        Self {
            id,
            state: RwLock::new(ChainState::genesis(id)),
            config,
            time,
            chain_events,
            challenge_events,
        }
    }

    /// Identifier of this ledger.
    pub fn id(&self) -> ChainId {
        self.id
    }

    /// Protocol parameters.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// The clock all deadlines are measured against.
    pub fn time_reference(&self) -> Arc<dyn TimeReference> {
        self.time.clone()
    }

    /// Receives every assertion event emitted after this call.
    pub fn subscribe_chain_events(&self) -> broadcast::Receiver<ChainEvent> {
        self.chain_events.subscribe()
    }

    /// Receives every challenge event emitted after this call.
    pub fn subscribe_challenge_events(&self) -> broadcast::Receiver<ChallengeEvent> {
        self.challenge_events.subscribe()
    }

    /// Runs a read-only transaction.
    pub fn call<T, E>(&self, f: impl FnOnce(&ReadTx<'_>) -> Result<T, E>) -> Result<T, E> {
        // A panicking writer never publishes its copy, so the guarded state is still consistent.
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let tx = ReadTx {
            chain: self,
            state: &state,
            now: self.time.now(),
        };
        f(&tx)
    }

    /// Runs a read-write transaction.
    ///
    /// The callback reads the committed state and copies it on its first mutation. If it returns
    /// `Ok` the copy replaces the ledger state and the buffered events are broadcast. If it
    /// returns `Err` nothing changes.
    pub fn tx<T, E>(&self, f: impl FnOnce(&mut WriteTx<'_>) -> Result<T, E>) -> Result<T, E> {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut tx = WriteTx {
            chain: self,
            state: Cow::Borrowed(&*guard),
            now: self.time.now(),
            chain_events: Vec::new(),
            challenge_events: Vec::new(),
        };
        let output = f(&mut tx)?;

        let WriteTx {
            state,
            chain_events,
            challenge_events,
            ..
        } = tx;
        let written = match state {
            Cow::Owned(state) => Some(state),
            Cow::Borrowed(_) => None,
        };
        let mutated = written.is_some();
        if let Some(state) = written {
            *guard = state;
        }
        debug!(
            chain_id = self.id.0,
            mutated,
            chain_events = chain_events.len(),
            challenge_events = challenge_events.len(),
            "Committed transaction"
        );
        // Published under the lock so that subscribers see events in commit order.
        // Sending only fails when nobody is subscribed.
        for event in chain_events {
            let _ = self.chain_events.send(event);
        }
        for event in challenge_events {
            let _ = self.challenge_events.send(event);
        }
        Ok(output)
    }
}

/// A read-only view of the ledger at one instant.
pub struct ReadTx<'a> {
    pub(crate) chain: &'a AssertionChain,
    pub(crate) state: &'a ChainState,
    pub(crate) now: Timestamp,
}

impl<'a> ReadTx<'a> {
    /// Time at which the transaction started.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Identifier of the ledger.
    pub fn chain_id(&self) -> ChainId {
        self.chain.id
    }

    /// The challenge period.
    pub fn challenge_period(&self) -> Duration {
        self.chain.config.challenge_period()
    }

    /// Balance of `addr`. Unknown accounts hold nothing.
    pub fn balance(&self, addr: &Address) -> u64 {
        self.state.balance(addr)
    }

    /// The most recently confirmed assertion.
    pub fn latest_confirmed(&self) -> Result<Assertion, ChainError> {
        self.state.assertion(self.state.latest_confirmed).cloned()
    }

    /// Number of assertions, genesis included.
    pub fn num_assertions(&self) -> u64 {
        self.state.assertions.len() as u64
    }

    /// Looks up an assertion.
    pub fn assertion(&self, id: AssertionId) -> Result<Assertion, ChainError> {
        self.state.assertion(id).cloned()
    }

    /// Direct children of an assertion, in creation order.
    pub fn assertion_children(&self, id: AssertionId) -> Vec<Assertion> {
        self.state
            .assertions
            .iter()
            .filter(|a| a.prev == Some(id))
            .cloned()
            .collect()
    }

    /// Looks up a challenge.
    pub fn challenge(&self, id: ChallengeId) -> Result<Challenge, ChainError> {
        self.state.challenge(id).cloned()
    }

    /// The challenge opened on an assertion.
    pub fn challenge_by_assertion(&self, id: AssertionId) -> Result<Challenge, ChainError> {
        let challenge = self
            .state
            .assertion(id)?
            .challenge
            .ok_or(ChainError::NotFound {
                kind: "challenge on assertion",
                id: id.0,
            })?;
        self.challenge(challenge)
    }

    /// Looks up a vertex.
    pub fn vertex(&self, id: VertexId) -> Result<ChallengeVertex, ChainError> {
        self.state.vertex(id).cloned()
    }

    /// The vertex of `challenge` that claims `history`.
    pub fn vertex_by_history(
        &self,
        challenge: ChallengeId,
        history: &HistoryCommitment,
    ) -> Result<ChallengeVertex, ChainError> {
        let id = self
            .state
            .vertices_by_history
            .get(&(challenge, history.hash()))
            .ok_or(ChainError::NotFound {
                kind: "vertex at height",
                id: history.height,
            })?;
        self.vertex(*id)
    }
}

/// An exclusive, buffered read-write transaction.
pub struct WriteTx<'a> {
    pub(crate) chain: &'a AssertionChain,
    pub(crate) state: Cow<'a, ChainState>,
    pub(crate) now: Timestamp,
    chain_events: Vec<ChainEvent>,
    challenge_events: Vec<ChallengeEvent>,
}

impl<'a> WriteTx<'a> {
    /// Reads the transaction's own uncommitted state.
    pub fn view(&self) -> ReadTx<'_> {
        ReadTx {
            chain: self.chain,
            state: &*self.state,
            now: self.now,
        }
    }

    /// The transaction's private copy, taken on first use.
    pub(crate) fn state_mut(&mut self) -> &mut ChainState {
        self.state.to_mut()
    }

    /// Whether the transaction has touched the state yet.
    pub(crate) fn has_written(&self) -> bool {
        matches!(self.state, Cow::Owned(_))
    }

    pub(crate) fn emit(&mut self, event: ChainEvent) {
        self.chain_events.push(event);
    }

    pub(crate) fn emit_challenge(&mut self, event: ChallengeEvent) {
        self.challenge_events.push(event);
    }

    pub(crate) fn challenge_period(&self) -> Duration {
        self.chain.config.challenge_period()
    }

    /// Overwrites the balance of `addr`.
    pub fn set_balance(&mut self, addr: Address, amount: u64) {
        let old_balance = self.state.balance(&addr);
        if amount == 0 {
            self.state_mut().balances.remove(&addr);
        } else {
            self.state_mut().balances.insert(addr, amount);
        }
        self.emit(ChainEvent::SetBalance {
            addr,
            old_balance,
            new_balance: amount,
        });
    }

    /// Credits `amount` to `addr`.
    pub fn add_to_balance(&mut self, addr: Address, amount: u64) {
        let balance = self.state.balance(&addr).saturating_add(amount);
        self.set_balance(addr, balance);
    }

    /// Debits `amount` from `addr`, failing rather than going negative.
    pub fn deduct_from_balance(&mut self, addr: Address, amount: u64) -> Result<(), ChainError> {
        let available = self.state.balance(&addr);
        let remaining = available
            .checked_sub(amount)
            .ok_or(ChainError::InsufficientBalance {
                needed: amount,
                available,
            })?;
        self.set_balance(addr, remaining);
        Ok(())
    }

    /// Creates a new pending assertion on top of `prev`.
    ///
    /// The staker pays [`ProtocolConfig::assertion_stake`] unless it already staked on `prev`, in
    /// which case the stake moves forward. A different staker's stake on `prev` is refunded.
    pub fn create_leaf(
        &mut self,
        prev: &Assertion,
        commitment: StateCommitment,
        staker: Address,
    ) -> Result<Assertion, ChainError> {
        if prev.chain_id != self.chain.id {
            return Err(ChainError::WrongChain);
        }
        let prev = self.state.assertion(prev.seq)?.clone();
        if prev.state_commitment.height >= commitment.height {
            return Err(ChainError::WrongHeight {
                height: commitment.height,
                parent_height: prev.state_commitment.height,
            });
        }
        let dedup_key = Hash::digest(&[commitment.hash().as_ref(), &prev.seq.0.to_be_bytes()]);
        if self.state.seen.contains(&dedup_key) {
            return Err(ChainError::AlreadyExists);
        }

        let stake = self.chain.config.assertion_stake;
        match prev.staker {
            Some(old_staker) if old_staker != staker => {
                self.deduct_from_balance(staker, stake)?;
                self.add_to_balance(old_staker, stake);
                self.state_mut().assertion_mut(prev.seq)?.staker = None;
            }
            Some(_) => {}
            None => self.deduct_from_balance(staker, stake)?,
        }

        let seq = AssertionId(self.state.assertions.len() as u64);
        let now = self.now;
        let parent = self.state_mut().assertion_mut(prev.seq)?;
        let is_first_child = parent.first_child_time.is_none();
        if is_first_child {
            parent.first_child_time = Some(now);
        } else if parent.second_child_time.is_none() {
            parent.second_child_time = Some(now);
        }

        let leaf = Assertion {
            chain_id: self.chain.id,
            seq,
            state_commitment: commitment,
            staker: Some(staker),
            prev: Some(prev.seq),
            status: AssertionStatus::Pending,
            is_first_child,
            first_child_time: None,
            second_child_time: None,
            challenge: None,
        };
        self.state_mut().assertions.push(leaf.clone());
        self.state_mut().seen.insert(dedup_key);
        debug!(
            seq = seq.0,
            prev = prev.seq.0,
            height = commitment.height,
            %staker,
            "Created assertion"
        );
        self.emit(ChainEvent::CreateLeaf {
            prev_seq: prev.seq,
            prev_state_commitment: prev.state_commitment,
            seq,
            state_commitment: commitment,
            staker,
        });
        Ok(leaf)
    }

    /// Confirms an assertion whose parent never got a second child, once the challenge period
    /// has passed since the first child appeared.
    pub fn confirm_no_rival(&mut self, id: AssertionId) -> Result<(), ChainError> {
        let assertion = self.state.assertion(id)?.clone();
        if assertion.status != AssertionStatus::Pending {
            return Err(ChainError::WrongState);
        }
        let prev_id = assertion
            .prev
            .ok_or(ChainError::InvalidOp("genesis has no parent"))?;
        let prev = self.state.assertion(prev_id)?;
        if prev.status != AssertionStatus::Confirmed {
            return Err(ChainError::WrongPredecessorState);
        }
        if prev.second_child_time.is_some() {
            return Err(ChainError::InvalidOp("assertion has a rival"));
        }
        let first_child_time = prev
            .first_child_time
            .ok_or(ChainError::InvalidOp("parent has no children"))?;
        if self.now <= first_child_time + self.challenge_period() {
            return Err(ChainError::NotYet);
        }

        self.mark_confirmed(id)?;
        if let (Some(staker), None) = (assertion.staker, assertion.first_child_time) {
            self.add_to_balance(staker, self.chain.config.assertion_stake);
            self.state_mut().assertion_mut(id)?.staker = None;
        }
        Ok(())
    }

    /// Confirms the assertion that won the challenge on its parent.
    pub fn confirm_for_win(&mut self, id: AssertionId) -> Result<(), ChainError> {
        let assertion = self.state.assertion(id)?;
        if assertion.status != AssertionStatus::Pending {
            return Err(ChainError::WrongState);
        }
        let prev_id = assertion
            .prev
            .ok_or(ChainError::InvalidOp("genesis has no parent"))?;
        let prev = self.state.assertion(prev_id)?;
        if prev.status != AssertionStatus::Confirmed {
            return Err(ChainError::WrongPredecessorState);
        }
        let challenge = prev.challenge.ok_or(ChainError::WrongPredecessorState)?;
        let winner = self
            .state
            .challenge(challenge)?
            .winner
            .ok_or(ChainError::NoWinnerYet)?;
        if winner != id {
            return Err(ChainError::InvalidOp("assertion lost the challenge"));
        }
        self.mark_confirmed(id)
    }

    /// Rejects an assertion that lost the challenge on its parent.
    pub fn reject_for_loss(&mut self, id: AssertionId) -> Result<(), ChainError> {
        let assertion = self.state.assertion(id)?;
        if assertion.status != AssertionStatus::Pending {
            return Err(ChainError::WrongState);
        }
        let prev_id = assertion
            .prev
            .ok_or(ChainError::InvalidOp("genesis has no parent"))?;
        let challenge = self
            .state
            .assertion(prev_id)?
            .challenge
            .ok_or(ChainError::WrongPredecessorState)?;
        let winner = self
            .state
            .challenge(challenge)?
            .winner
            .ok_or(ChainError::NoWinnerYet)?;
        if winner == id {
            return Err(ChainError::InvalidOp("assertion won the challenge"));
        }
        self.mark_rejected(id)
    }

    /// Rejects an assertion whose parent was rejected.
    pub fn reject_for_prev(&mut self, id: AssertionId) -> Result<(), ChainError> {
        let assertion = self.state.assertion(id)?;
        if assertion.status != AssertionStatus::Pending {
            return Err(ChainError::WrongState);
        }
        let prev_id = assertion
            .prev
            .ok_or(ChainError::InvalidOp("genesis has no parent"))?;
        if self.state.assertion(prev_id)?.status != AssertionStatus::Rejected {
            return Err(ChainError::WrongPredecessorState);
        }
        self.mark_rejected(id)
    }

    fn mark_confirmed(&mut self, id: AssertionId) -> Result<(), ChainError> {
        self.state_mut().assertion_mut(id)?.status = AssertionStatus::Confirmed;
        self.state_mut().latest_confirmed = id;
        info!(seq = id.0, "Confirmed assertion");
        self.emit(ChainEvent::Confirm { seq: id });
        Ok(())
    }

    fn mark_rejected(&mut self, id: AssertionId) -> Result<(), ChainError> {
        self.state_mut().assertion_mut(id)?.status = AssertionStatus::Rejected;
        info!(seq = id.0, "Rejected assertion");
        self.emit(ChainEvent::Reject { seq: id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sov_challenge_interface::mocks::ArtificialTimeReference;

    use super::*;

    fn chain() -> (AssertionChain, ArtificialTimeReference) {
        let time = ArtificialTimeReference::new();
        let config = ProtocolConfig::with_challenge_period(Duration::from_secs(60));
        (AssertionChain::new(config, Arc::new(time.clone())), time)
    }

    #[test]
    fn failed_transactions_leave_no_trace() {
        let (chain, _) = chain();
        let staker = Address::repeat_byte(1);
        let mut events = chain.subscribe_chain_events();
        let result: Result<(), ChainError> = chain.tx(|tx| {
            tx.set_balance(staker, 5);
            Err(ChainError::WrongState)
        });
        assert_eq!(result, Err(ChainError::WrongState));
        assert_eq!(chain.call(|tx| Ok::<_, ChainError>(tx.balance(&staker))), Ok(0));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn write_sees_its_own_changes() {
        let (chain, _) = chain();
        let staker = Address::repeat_byte(1);
        let seen = chain
            .tx(|tx| {
                tx.set_balance(staker, 10);
                tx.deduct_from_balance(staker, 4)?;
                Ok::<_, ChainError>(tx.view().balance(&staker))
            })
            .unwrap();
        assert_eq!(seen, 6);
    }

    #[test]
    fn deduct_never_underflows() {
        let (chain, _) = chain();
        let staker = Address::repeat_byte(1);
        let err = chain
            .tx(|tx| {
                tx.set_balance(staker, 3);
                tx.deduct_from_balance(staker, 4)
            })
            .unwrap_err();
        assert_eq!(
            err,
            ChainError::InsufficientBalance {
                needed: 4,
                available: 3
            }
        );
    }

    #[test]
    fn refused_moves_leave_the_state_uncopied() {
        let (chain, _) = chain();
        let staker = Address::repeat_byte(1);
        chain
            .tx(|tx| {
                let genesis = tx.view().assertion(AssertionId::GENESIS)?;
                let err = tx
                    .create_leaf(&genesis, StateCommitment::default(), staker)
                    .unwrap_err();
                assert!(matches!(err, ChainError::WrongHeight { .. }));
                assert_eq!(tx.confirm_no_rival(AssertionId::GENESIS), Err(ChainError::WrongState));
                assert!(!tx.has_written());
                tx.set_balance(staker, 1);
                assert!(tx.has_written());
                Ok::<_, ChainError>(())
            })
            .unwrap();
        assert_eq!(chain.call(|tx| Ok::<_, ChainError>(tx.balance(&staker))), Ok(1));
    }

    #[test]
    fn chains_have_distinct_ids() {
        let (a, _) = chain();
        let (b, _) = chain();
        assert_ne!(a.id(), b.id());
    }
}
