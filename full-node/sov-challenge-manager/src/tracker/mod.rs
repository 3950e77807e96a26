//! Follows one challenge vertex until it is confirmed or its dispute is over.

mod states;

use std::sync::Arc;
use std::time::Duration;

use sov_assertion_chain::{
    AssertionChain, ChainError, ChallengeId, ReadTx, VertexId, VertexStatus, WriteTx,
};
use sov_challenge_interface::merkle::verify_prefix_proof;
use sov_challenge_interface::services::ExecutionOracle;
use sov_challenge_interface::{
    bisection_point, Address, BisectionError, ChallengeType, Hash, HistoryCommitment,
    MerkleError,
};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub use self::states::{TrackerAction, TrackerState};
use crate::fsm::{Fsm, FsmError};
use crate::supervisor::SpawnRequest;

/// Failures of a single tracker step. None of them stop the tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The ledger refused a read or a move.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// The tracker's state machine refused a transition.
    #[error(transparent)]
    Fsm(#[from] FsmError),
    /// The vertex's range cannot be bisected.
    #[error(transparent)]
    Bisection(#[from] BisectionError),
    /// The oracle produced a proof that does not verify against the ledger's commitment.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// The execution oracle failed.
    #[error("execution oracle failed: {0}")]
    Oracle(anyhow::Error),
    /// Nobody is listening for spawn requests any more.
    #[error("tracker spawner closed")]
    SpawnerClosed,
}

/// Everything a tracker needs besides the vertex it follows.
#[derive(Clone)]
pub struct TrackerContext {
    /// Shared ledger.
    pub chain: Arc<AssertionChain>,
    /// Local execution.
    pub oracle: Arc<dyn ExecutionOracle>,
    /// Validator name, for logs.
    pub name: String,
    /// Account that makes the moves.
    pub address: Address,
    /// Interval between wake-ups.
    pub act_every: Duration,
    /// Where trackers for newly created vertices are requested.
    pub spawner: mpsc::UnboundedSender<SpawnRequest>,
}

#[derive(Debug, Clone, Copy)]
enum ConfirmationRule {
    SubChallengeWin,
    PresumptiveTimer,
    ChallengeDeadline,
}

impl ConfirmationRule {
    fn check(self, tx: &ReadTx<'_>, vertex: VertexId) -> Result<(), ChainError> {
        match self {
            Self::SubChallengeWin => tx.check_sub_challenge_win(vertex),
            Self::PresumptiveTimer => tx.check_ps_timer(vertex),
            Self::ChallengeDeadline => tx.check_challenge_deadline(vertex),
        }
    }

    fn confirm(self, tx: &mut WriteTx<'_>, vertex: VertexId) -> Result<(), ChainError> {
        match self {
            Self::SubChallengeWin => tx.confirm_for_sub_challenge_win(vertex),
            Self::PresumptiveTimer => tx.confirm_for_ps_timer(vertex),
            Self::ChallengeDeadline => tx.confirm_for_challenge_deadline(vertex),
        }
    }
}

/// Plays one vertex of a challenge on behalf of the local validator.
pub struct VertexTracker {
    ctx: TrackerContext,
    challenge: ChallengeId,
    vertex: VertexId,
    fork_point: Option<VertexId>,
    fsm: Fsm<TrackerState, TrackerAction>,
}

impl VertexTracker {
    /// A tracker in [`TrackerState::Started`].
    pub fn new(
        ctx: TrackerContext,
        challenge: ChallengeId,
        vertex: VertexId,
    ) -> Result<Self, TrackerError> {
        Ok(Self {
            ctx,
            challenge,
            vertex,
            fork_point: None,
            fsm: states::tracker_fsm()?,
        })
    }

    /// The tracked vertex.
    pub fn vertex(&self) -> VertexId {
        self.vertex
    }

    /// Current state.
    pub fn state(&self) -> TrackerState {
        self.fsm.current()
    }

    /// Wakes the tracker up at `act_every` until it finishes or `shutdown` fires.
    pub async fn run(mut self, mut shutdown: watch::Receiver<()>) {
        info!(
            validator = %self.ctx.name,
            challenge = self.challenge.0,
            vertex = self.vertex.0,
            "Tracking challenge vertex"
        );
        let mut ticker = tokio::time::interval(self.ctx.act_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(TrackerError::Oracle(err)) => error!(
                            validator = %self.ctx.name,
                            vertex = self.vertex.0,
                            %err,
                            "Execution oracle failed"
                        ),
                        Err(err) => warn!(
                            validator = %self.ctx.name,
                            vertex = self.vertex.0,
                            state = %self.state(),
                            %err,
                            "Tracker step failed"
                        ),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(
            validator = %self.ctx.name,
            vertex = self.vertex.0,
            state = %self.state(),
            "Tracker exited"
        );
    }

    /// One wake-up: returns `true` once there is nothing left to do, otherwise acts once.
    pub async fn tick(&mut self) -> Result<bool, TrackerError> {
        if self.is_done()? {
            return Ok(true);
        }
        self.act().await?;
        Ok(false)
    }

    /// Whether the vertex was confirmed, a sibling was confirmed or the challenge was decided.
    pub fn is_done(&self) -> Result<bool, TrackerError> {
        let (challenge, vertex) = (self.challenge, self.vertex);
        let done = self.ctx.chain.call(|tx| {
            Ok::<_, ChainError>(
                tx.vertex(vertex)?.status == VertexStatus::Confirmed
                    || tx.challenge_completed(challenge)?
                    || tx.has_confirmed_sibling(vertex)?,
            )
        })?;
        Ok(done)
    }

    /// Performs the work of the current state and moves to the next one.
    pub async fn act(&mut self) -> Result<TrackerState, TrackerError> {
        match self.fsm.current() {
            TrackerState::Started => self.classify()?,
            TrackerState::Presumptive => {
                if self.try_confirm()? {
                    self.transition(TrackerAction::ConfirmWinner)?;
                } else if !self.is_presumptive()? {
                    self.transition(TrackerAction::BackToStart)?;
                }
            }
            TrackerState::AtOneStepFork => {
                info!(
                    validator = %self.ctx.name,
                    vertex = self.vertex.0,
                    fork_point = ?self.fork_point.map(|v| v.0),
                    "Reached one-step fork"
                );
                let challenge = self.challenge;
                let level = self
                    .ctx
                    .chain
                    .call(|tx| tx.challenge(challenge))?
                    .challenge_type;
                if level == ChallengeType::SmallStep {
                    self.transition(TrackerAction::OneStepProof)?;
                } else {
                    self.transition(TrackerAction::OpenSubchallenge)?;
                }
            }
            TrackerState::AtOneStepProof | TrackerState::AwaitingSubchallengeResolution => {
                if self.try_confirm()? {
                    self.transition(TrackerAction::ConfirmWinner)?;
                }
            }
            TrackerState::OpeningSubchallenge => self.open_sub_challenge()?,
            TrackerState::AddingSubchallengeLeaf => self.join_sub_challenge()?,
            TrackerState::Bisecting => match self.bisect().await {
                Ok(created) => {
                    self.spawn(created)?;
                    self.transition(TrackerAction::BackToStart)?;
                }
                Err(TrackerError::Chain(ChainError::AlreadyExists)) => {
                    self.transition(TrackerAction::Merge)?;
                }
                Err(TrackerError::Chain(err)) if is_precondition(&err) => {
                    self.give_up_move(err)?;
                }
                Err(err) => return Err(err),
            },
            TrackerState::Merging => match self.merge().await {
                Ok(target) => {
                    self.spawn(target)?;
                    self.transition(TrackerAction::BackToStart)?;
                }
                Err(TrackerError::Chain(err)) if is_precondition(&err) => {
                    self.give_up_move(err)?;
                }
                Err(err) => return Err(err),
            },
            TrackerState::Confirming => {}
        }
        Ok(self.fsm.current())
    }

    fn transition(&mut self, action: TrackerAction) -> Result<(), TrackerError> {
        let from = self.fsm.current();
        let to = self.fsm.do_transition(action)?;
        debug!(
            validator = %self.ctx.name,
            vertex = self.vertex.0,
            %from,
            %to,
            ?action,
            "Tracker transition"
        );
        Ok(())
    }

    fn classify(&mut self) -> Result<(), TrackerError> {
        let vertex = self.vertex;
        let (fork_point, one_step, presumptive) = self.ctx.chain.call(|tx| {
            let v = tx.vertex(vertex)?;
            let (fork_point, one_step) = match v.prev {
                Some(prev) => {
                    let one_step =
                        tx.vertex(prev)?.history.height.checked_add(1) == Some(v.history.height);
                    let at_fork = one_step && tx.children_at_one_step_fork(prev)?;
                    (at_fork.then_some(prev), one_step)
                }
                None => (None, false),
            };
            Ok::<_, ChainError>((fork_point, one_step, tx.is_presumptive_successor(vertex)?))
        })?;

        if let Some(fork_point) = fork_point {
            self.fork_point = Some(fork_point);
            self.transition(TrackerAction::OneStepFork)
        } else if presumptive {
            self.transition(TrackerAction::MarkPresumptive)
        } else if one_step {
            debug!(
                validator = %self.ctx.name,
                vertex = vertex.0,
                "Waiting for a one-step rival"
            );
            Ok(())
        } else {
            self.transition(TrackerAction::Bisect)
        }
    }

    fn is_presumptive(&self) -> Result<bool, TrackerError> {
        let vertex = self.vertex;
        Ok(self
            .ctx
            .chain
            .call(|tx| tx.is_presumptive_successor(vertex))?)
    }

    /// Tries every confirmation rule in turn. Rules are checked under the read lock, and only a
    /// rule that passes is attempted in a write transaction.
    fn try_confirm(&self) -> Result<bool, TrackerError> {
        let vertex = self.vertex;
        let ready = self.ctx.chain.call(|tx| {
            for rule in [
                ConfirmationRule::SubChallengeWin,
                ConfirmationRule::PresumptiveTimer,
                ConfirmationRule::ChallengeDeadline,
            ] {
                match rule.check(tx, vertex) {
                    Ok(()) => return Ok(Some(rule)),
                    Err(err @ ChainError::NotFound { .. }) => return Err(err),
                    Err(err) => debug!(vertex = vertex.0, ?rule, %err, "Vertex not confirmable"),
                }
            }
            Ok(None)
        })?;
        let Some(rule) = ready else {
            return Ok(false);
        };
        match self.ctx.chain.tx(|tx| rule.confirm(tx, vertex)) {
            Ok(()) => {
                info!(
                    validator = %self.ctx.name,
                    vertex = vertex.0,
                    ?rule,
                    "Confirmed challenge vertex"
                );
                Ok(true)
            }
            Err(err @ ChainError::NotFound { .. }) => Err(err.into()),
            // Another validator got there first.
            Err(err) => {
                debug!(vertex = vertex.0, ?rule, %err, "Confirmation lost a race");
                Ok(false)
            }
        }
    }

    fn open_sub_challenge(&mut self) -> Result<(), TrackerError> {
        let Some(fork_point) = self.fork_point else {
            return self.transition(TrackerAction::BackToStart);
        };
        match self
            .ctx
            .chain
            .tx(|tx| tx.create_sub_challenge(fork_point))
        {
            Ok(sub_challenge) => info!(
                validator = %self.ctx.name,
                fork_point = fork_point.0,
                level = %sub_challenge.challenge_type,
                "Opened sub-challenge"
            ),
            Err(ChainError::AlreadyExists) => {}
            // A confirmed fork point cannot host a sub-challenge. The clocks still decide.
            Err(ChainError::WrongState) => warn!(
                validator = %self.ctx.name,
                fork_point = fork_point.0,
                "Fork point is confirmed, skipping sub-challenge"
            ),
            Err(err) => return Err(err.into()),
        }
        self.transition(TrackerAction::OpenSubchallengeLeaf)
    }

    fn join_sub_challenge(&mut self) -> Result<(), TrackerError> {
        let Some(fork_point) = self.fork_point else {
            return self.transition(TrackerAction::BackToStart);
        };
        let (sub_challenge, fork_status) = self.ctx.chain.call(|tx| {
            Ok::<_, ChainError>((tx.sub_challenge(fork_point)?, tx.vertex(fork_point)?.status))
        })?;
        match sub_challenge {
            Some(sub_challenge) => {
                debug!(
                    validator = %self.ctx.name,
                    vertex = self.vertex.0,
                    fork_point = fork_point.0,
                    level = %sub_challenge.challenge_type,
                    "Joined sub-challenge"
                );
                self.transition(TrackerAction::AwaitSubchallengeResolution)
            }
            // Nothing to join. The clocks decide between the children.
            None if fork_status == VertexStatus::Confirmed => {
                self.transition(TrackerAction::AwaitSubchallengeResolution)
            }
            None => {
                warn!(
                    validator = %self.ctx.name,
                    fork_point = fork_point.0,
                    "Fork point has no sub-challenge"
                );
                self.transition(TrackerAction::BackToStart)
            }
        }
    }

    fn give_up_move(&mut self, err: ChainError) -> Result<(), TrackerError> {
        warn!(
            validator = %self.ctx.name,
            vertex = self.vertex.0,
            state = %self.state(),
            %err,
            "Move no longer possible"
        );
        self.transition(TrackerAction::BackToStart)
    }

    fn history_start(&self, tx: &ReadTx<'_>) -> Result<u64, ChainError> {
        let root = tx.challenge(self.challenge)?.root_assertion;
        Ok(tx.assertion(root)?.state_commitment.height)
    }

    /// Local history at `height` together with a proof that it prefixes `history`.
    async fn prefix_of(
        &self,
        start: u64,
        height: u64,
        history: &HistoryCommitment,
    ) -> Result<(HistoryCommitment, Vec<Hash>), TrackerError> {
        let prefix = self
            .ctx
            .oracle
            .history_commitment(start, height)
            .await
            .map_err(TrackerError::Oracle)?;
        let proof = self
            .ctx
            .oracle
            .prefix_proof(start, height, history.height)
            .await
            .map_err(TrackerError::Oracle)?;
        verify_prefix_proof(&prefix, history, &proof)?;
        Ok((prefix, proof))
    }

    async fn bisect(&self) -> Result<VertexId, TrackerError> {
        let vertex = self.vertex;
        let (start, height, history) = self.ctx.chain.call(|tx| {
            Ok::<_, ChainError>((
                self.history_start(tx)?,
                tx.required_bisection_height(vertex)?,
                tx.vertex(vertex)?.history,
            ))
        })?;
        let (prefix, proof) = self.prefix_of(start, height, &history).await?;
        let address = self.ctx.address;
        let created = self
            .ctx
            .chain
            .tx(|tx| tx.bisect(vertex, prefix, &proof, address))?;
        info!(
            validator = %self.ctx.name,
            from = vertex.0,
            vertex = created.id.0,
            height,
            "Bisected challenge vertex"
        );
        Ok(created.id)
    }

    async fn merge(&self) -> Result<VertexId, TrackerError> {
        let (challenge, vertex) = (self.challenge, self.vertex);
        let (start, prev_height, history) = self.ctx.chain.call(|tx| {
            let v = tx.vertex(vertex)?;
            let prev = v.prev.ok_or(ChainError::InvalidOp("cannot merge the root vertex"))?;
            Ok::<_, ChainError>((
                self.history_start(tx)?,
                tx.vertex(prev)?.history.height,
                v.history,
            ))
        })?;
        let height = bisection_point(prev_height, history.height)?;
        let (prefix, proof) = self.prefix_of(start, height, &history).await?;
        let address = self.ctx.address;
        let target = self.ctx.chain.tx(|tx| {
            let target = tx.view().vertex_by_history(challenge, &prefix)?;
            tx.merge(vertex, target.id, &proof, address)
        })?;
        info!(
            validator = %self.ctx.name,
            from = vertex.0,
            vertex = target.id.0,
            height,
            "Merged challenge vertex"
        );
        Ok(target.id)
    }

    fn spawn(&self, vertex: VertexId) -> Result<(), TrackerError> {
        self.ctx
            .spawner
            .send(SpawnRequest {
                challenge: self.challenge,
                vertex,
            })
            .map_err(|_| TrackerError::SpawnerClosed)
    }
}

/// Ledger refusals that say the move no longer applies, as opposed to bad input.
fn is_precondition(err: &ChainError) -> bool {
    matches!(
        err,
        ChainError::WrongState
            | ChainError::WrongPredecessorState
            | ChainError::InvalidOp(_)
            | ChainError::PastDeadline
            | ChainError::NotYet
            | ChainError::NotFound { .. }
    )
}
