#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sov_assertion_chain::{
    AssertionChain, AssertionId, ChainError, Challenge, ChallengeVertex, ProtocolConfig, VertexId,
};
use sov_challenge_interface::merkle::{generate_prefix_proof, MerkleExpansion};
use sov_challenge_interface::mocks::{ArtificialTimeReference, SimulatedExecution};
use sov_challenge_interface::{Address, Hash, HistoryCommitment, StateCommitment};

pub const PERIOD: Duration = Duration::from_secs(100);
pub const FUNDS: u64 = 1_000_000_000_000;

pub struct TestChain {
    pub chain: AssertionChain,
    pub time: ArtificialTimeReference,
    pub alice: Address,
    pub bob: Address,
}

pub fn setup() -> TestChain {
    let time = ArtificialTimeReference::new();
    let chain = AssertionChain::new(
        ProtocolConfig::with_challenge_period(PERIOD),
        Arc::new(time.clone()),
    );
    let alice = Address::repeat_byte(0xa1);
    let bob = Address::repeat_byte(0xb0);
    chain
        .tx(|tx| {
            tx.set_balance(alice, FUNDS);
            tx.set_balance(bob, FUNDS);
            Ok::<_, ChainError>(())
        })
        .unwrap();
    TestChain {
        chain,
        time,
        alice,
        bob,
    }
}

/// A party's view of the step results between two assertions.
pub struct History {
    pub address: Address,
    pub roots: Vec<Hash>,
}

impl History {
    pub fn honest(address: Address, height: u64) -> Self {
        Self {
            address,
            roots: SimulatedExecution::honest(height + 1).state_roots().to_vec(),
        }
    }

    /// Agrees with [`History::honest`] before `divergence`.
    pub fn diverging(address: Address, height: u64, divergence: u64) -> Self {
        Self {
            address,
            roots: SimulatedExecution::diverging_at(height + 1, divergence)
                .state_roots()
                .to_vec(),
        }
    }

    pub fn height(&self) -> u64 {
        self.roots.len() as u64 - 1
    }

    pub fn state_commitment(&self) -> StateCommitment {
        StateCommitment::new(self.height(), *self.roots.last().unwrap())
    }

    pub fn commit(&self, height: u64) -> HistoryCommitment {
        HistoryCommitment::from_leaves(&self.roots[..=height as usize]).unwrap()
    }

    pub fn proof(&self, lo: u64, hi: u64) -> Vec<Hash> {
        let split = lo as usize + 1;
        let prefix = MerkleExpansion::from_leaves(&self.roots[..split]);
        generate_prefix_proof(lo, &prefix, &self.roots[split..=hi as usize]).unwrap()
    }
}

/// Two assertions on genesis, a challenge on genesis and a leaf for each party.
pub struct Dispute {
    pub challenge: Challenge,
    pub alice_assertion: AssertionId,
    pub bob_assertion: AssertionId,
    pub alice_leaf: ChallengeVertex,
    pub bob_leaf: ChallengeVertex,
}

pub fn open_dispute(t: &TestChain, alice: &History, bob: &History) -> Dispute {
    t.chain
        .tx(|tx| {
            let genesis = tx.view().assertion(AssertionId::GENESIS)?;
            let a = tx.create_leaf(&genesis, alice.state_commitment(), t.alice)?;
            let b = tx.create_leaf(&genesis, bob.state_commitment(), t.bob)?;
            let challenge = tx.create_challenge(AssertionId::GENESIS, t.bob)?;
            let alice_leaf =
                tx.add_leaf(challenge.id, a.seq, alice.commit(alice.height()), t.alice)?;
            let bob_leaf = tx.add_leaf(challenge.id, b.seq, bob.commit(bob.height()), t.bob)?;
            Ok::<_, ChainError>(Dispute {
                challenge,
                alice_assertion: a.seq,
                bob_assertion: b.seq,
                alice_leaf,
                bob_leaf,
            })
        })
        .unwrap()
}

/// Makes the bisection or merge move for `vertex`, if it has one.
/// Returns the vertex the move produced or merged into.
pub fn make_move(t: &TestChain, history: &History, vertex: VertexId) -> Option<VertexId> {
    t.chain
        .tx(|tx| {
            let view = tx.view();
            if view.is_presumptive_successor(vertex)? {
                return Ok(None);
            }
            let v = view.vertex(vertex)?;
            let prev = view.vertex(v.prev.expect("non-root vertex"))?;
            if v.history.height == prev.history.height + 1 {
                return Ok(None);
            }
            let mid = view.required_bisection_height(vertex)?;
            drop(view);
            let commitment = history.commit(mid);
            let proof = history.proof(mid, v.history.height);
            match tx.bisect(vertex, commitment, &proof, history.address) {
                Ok(created) => {
                    assert_eq!(created.history.height, mid);
                    Ok(Some(created.id))
                }
                Err(ChainError::AlreadyExists) => {
                    let target = tx.view().vertex_by_history(v.challenge, &commitment)?;
                    let merged = tx.merge(vertex, target.id, &proof, history.address)?;
                    Ok::<_, ChainError>(Some(merged.id))
                }
                Err(e) => Err(e),
            }
        })
        .unwrap()
}

/// Lets both parties move every vertex they track until nobody can move.
pub fn play_out(
    t: &TestChain,
    alice: &History,
    bob: &History,
    dispute: &Dispute,
) -> (Vec<VertexId>, Vec<VertexId>) {
    let mut alice_vertices = vec![dispute.alice_leaf.id];
    let mut bob_vertices = vec![dispute.bob_leaf.id];
    loop {
        let mut moved = false;
        for (history, tracked) in [(alice, &mut alice_vertices), (bob, &mut bob_vertices)] {
            for vertex in tracked.clone() {
                if let Some(next) = make_move(t, history, vertex) {
                    moved = true;
                    if !tracked.contains(&next) {
                        tracked.push(next);
                    }
                }
            }
        }
        if !moved {
            return (alice_vertices, bob_vertices);
        }
    }
}
