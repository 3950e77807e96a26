//! The validator agent: stakes on local state, spots forks and joins the challenges they open.

use std::sync::Arc;

use sov_assertion_chain::{
    Assertion, AssertionChain, AssertionId, ChainError, ChainEvent, ChallengeId,
};
use sov_challenge_interface::services::ExecutionOracle;
use sov_challenge_interface::Address;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::ValidatorConfig;
use crate::supervisor::SpawnRequest;

/// Acts on the assertion ledger on behalf of one staker.
pub struct Validator {
    chain: Arc<AssertionChain>,
    oracle: Arc<dyn ExecutionOracle>,
    name: String,
    address: Address,
    spawner: mpsc::UnboundedSender<SpawnRequest>,
}

impl Validator {
    /// A validator that hands the vertices it creates to `spawner`.
    pub fn new(
        chain: Arc<AssertionChain>,
        oracle: Arc<dyn ExecutionOracle>,
        config: &ValidatorConfig,
        spawner: mpsc::UnboundedSender<SpawnRequest>,
    ) -> Self {
        Self {
            chain,
            oracle,
            name: config.name.clone(),
            address: config.address,
            spawner,
        }
    }

    /// Account the validator stakes with.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Stakes on the latest local state, on top of the latest assertion local state agrees with.
    ///
    /// Returns `None` when the ledger already holds that assertion or local state has not moved
    /// past the parent.
    pub async fn submit_leaf_creation(&self) -> anyhow::Result<Option<Assertion>> {
        let parent = self.find_latest_valid_assertion().await?;
        let commitment = self.oracle.latest_state_commitment().await?;
        match self
            .chain
            .tx(|tx| tx.create_leaf(&parent, commitment, self.address))
        {
            Ok(leaf) => {
                info!(
                    validator = %self.name,
                    seq = leaf.seq.0,
                    parent = parent.seq.0,
                    height = commitment.height,
                    state_root = %commitment.state_root,
                    "Submitted leaf creation"
                );
                Ok(Some(leaf))
            }
            Err(ChainError::AlreadyExists) => {
                debug!(
                    validator = %self.name,
                    parent = parent.seq.0,
                    height = commitment.height,
                    "Assertion already exists"
                );
                Ok(None)
            }
            Err(err @ ChainError::WrongHeight { .. }) => {
                debug!(validator = %self.name, %err, "No new state to assert");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Walks from the latest confirmed assertion and keeps the last one whose state root is part
    /// of local history.
    async fn find_latest_valid_assertion(&self) -> anyhow::Result<Assertion> {
        let (mut latest, num_assertions) = self
            .chain
            .call(|tx| Ok::<_, ChainError>((tx.latest_confirmed()?, tx.num_assertions())))?;
        for seq in latest.seq.0 + 1..num_assertions {
            let candidate = self.chain.call(|tx| tx.assertion(AssertionId(seq)))?;
            if self
                .oracle
                .has_state_root(&candidate.state_commitment.state_root)
                .await?
            {
                latest = candidate;
            }
        }
        Ok(latest)
    }

    /// Reacts to a new assertion. If its parent now has rival children, defends the child local
    /// state agrees with.
    pub async fn process_leaf_creation(
        &self,
        seq: AssertionId,
    ) -> anyhow::Result<Option<SpawnRequest>> {
        let assertion = self.chain.call(|tx| tx.assertion(seq))?;
        let Some(parent) = assertion.prev else {
            return Ok(None);
        };
        self.defend_children_of(parent).await
    }

    async fn defend_children_of(
        &self,
        parent: AssertionId,
    ) -> anyhow::Result<Option<SpawnRequest>> {
        let (parent, children) = self.chain.call(|tx| {
            Ok::<_, ChainError>((tx.assertion(parent)?, tx.assertion_children(parent)))
        })?;
        if children.len() < 2 {
            return Ok(None);
        }
        let mut honest = None;
        for child in children {
            if self
                .oracle
                .has_state_root(&child.state_commitment.state_root)
                .await?
            {
                honest = Some(child);
                break;
            }
        }
        let Some(leaf) = honest else {
            info!(
                validator = %self.name,
                parent = parent.seq.0,
                "Fork without a child matching local state"
            );
            return Ok(None);
        };
        info!(
            validator = %self.name,
            parent = parent.seq.0,
            seq = leaf.seq.0,
            height = leaf.state_commitment.height,
            created_by = ?leaf.staker,
            "Detected fork, defending leaf that matches local state"
        );

        let Some(challenge) = self.open_challenge(parent.seq)? else {
            return Ok(None);
        };
        let start = parent.state_commitment.height;
        let history = self
            .oracle
            .history_commitment(start, leaf.state_commitment.height - start)
            .await?;
        let vertex = match self
            .chain
            .tx(|tx| tx.add_leaf(challenge, leaf.seq, history, self.address))
        {
            Ok(vertex) => {
                info!(
                    validator = %self.name,
                    challenge = challenge.0,
                    vertex = vertex.id.0,
                    "Added challenge leaf"
                );
                vertex.id
            }
            Err(ChainError::AlreadyExists) => {
                self.chain
                    .call(|tx| tx.vertex_by_history(challenge, &history))?
                    .id
            }
            Err(err) => return Err(err.into()),
        };

        let request = SpawnRequest { challenge, vertex };
        self.spawner
            .send(request)
            .map_err(|_| anyhow::anyhow!("tracker spawner closed"))?;
        Ok(Some(request))
    }

    /// The challenge on `parent`, opening it if nobody has yet.
    ///
    /// `None` when the challenge does not exist and this validator may not open it.
    fn open_challenge(&self, parent: AssertionId) -> anyhow::Result<Option<ChallengeId>> {
        match self
            .chain
            .tx(|tx| tx.create_challenge(parent, self.address))
        {
            Ok(challenge) => Ok(Some(challenge.id)),
            Err(ChainError::ChallengeAlreadyExists) => {
                Ok(Some(self.chain.call(|tx| tx.challenge_by_assertion(parent))?.id))
            }
            Err(ChainError::CannotChallengeOwnLeaf) => {
                debug!(
                    validator = %self.name,
                    parent = parent.0,
                    "Waiting for a rival to open the challenge"
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Confirms an assertion that went unrivaled for a full challenge period.
    pub fn confirm_leaf_no_rival(&self, seq: AssertionId) -> bool {
        match self.chain.tx(|tx| tx.confirm_no_rival(seq)) {
            Ok(()) => {
                info!(
                    validator = %self.name,
                    seq = seq.0,
                    "Confirmed leaf passed challenge period"
                );
                true
            }
            Err(err) => {
                warn!(
                    validator = %self.name,
                    seq = seq.0,
                    %err,
                    "Could not confirm that leaf had no rival"
                );
                false
            }
        }
    }

    /// Reacts to ledger events until `shutdown` fires.
    pub async fn listen(&self, shutdown: watch::Receiver<()>) {
        self.listen_to(self.chain.subscribe_chain_events(), shutdown)
            .await
    }

    /// Like [`Validator::listen`], on a feed the caller subscribed to.
    pub async fn listen_to(
        &self,
        mut events: broadcast::Receiver<ChainEvent>,
        mut shutdown: watch::Receiver<()>,
    ) {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.changed() => break,
            };
            match event {
                Ok(event) => self.handle(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(validator = %self.name, skipped, "Chain event feed lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(validator = %self.name, "Stopped listening for chain events");
    }

    async fn handle(&self, event: ChainEvent) {
        let result = match event {
            // Own leaves count too: the second leaf of a fork is often ours.
            ChainEvent::CreateLeaf { seq, .. } => self.process_leaf_creation(seq).await,
            ChainEvent::StartChallenge {
                parent_seq,
                parent_staker,
                challenger,
                ..
            } => {
                if parent_staker == Some(self.address) {
                    warn!(
                        validator = %self.name,
                        seq = parent_seq.0,
                        %challenger,
                        "Received challenge for a created leaf"
                    );
                }
                if challenger == self.address {
                    Ok(None)
                } else {
                    self.defend_children_of(parent_seq).await
                }
            }
            ChainEvent::Confirm { seq } => {
                info!(validator = %self.name, seq = seq.0, "Assertion confirmed");
                Ok(None)
            }
            ChainEvent::Reject { .. } | ChainEvent::SetBalance { .. } => Ok(None),
        };
        if let Err(err) = result {
            error!(validator = %self.name, %err, "Could not process chain event");
        }
    }
}
