mod common;

use std::time::Duration;

use common::{init_logging, setup_chain, Party, PERIOD};
use sov_assertion_chain::{AssertionId, AssertionStatus, ChainError, VertexStatus};
use sov_challenge_interface::services::ExecutionOracle;
use sov_challenge_interface::ChallengeType;
use sov_challenge_manager::{DeterministicScheduler, TrackerState, Validator};

const MAX_ROUNDS: usize = 400;

#[tokio::test]
async fn trackers_narrow_the_dispute_to_the_first_divergent_step() {
    init_logging();
    let alice = Party::alice(101);
    let bob = Party::bob(101, 37);
    let (chain, time) = setup_chain(&[&alice, &bob]);

    let mut alice_trackers =
        DeterministicScheduler::new(chain.clone(), alice.oracle.clone(), &alice.config);
    let mut bob_trackers =
        DeterministicScheduler::new(chain.clone(), bob.oracle.clone(), &bob.config);
    let alice_validator = Validator::new(
        chain.clone(),
        alice.oracle.clone(),
        &alice.config,
        alice_trackers.spawner(),
    );
    let bob_validator = Validator::new(
        chain.clone(),
        bob.oracle.clone(),
        &bob.config,
        bob_trackers.spawner(),
    );

    let alice_leaf = alice_validator.submit_leaf_creation().await.unwrap().unwrap();
    let bob_leaf = bob_validator.submit_leaf_creation().await.unwrap().unwrap();
    let alice_request = alice_validator
        .process_leaf_creation(bob_leaf.seq)
        .await
        .unwrap()
        .unwrap();
    let bob_request = bob_validator
        .process_leaf_creation(bob_leaf.seq)
        .await
        .unwrap()
        .unwrap();
    let challenge = alice_request.challenge;
    assert_eq!(bob_request.challenge, challenge);

    // Both histories agree on every step up to 36.
    let shared_history = alice.oracle.history_commitment(0, 32).await.unwrap();
    let fork_history = alice.oracle.history_commitment(0, 36).await.unwrap();
    let alice_step = alice.oracle.history_commitment(0, 37).await.unwrap();
    let bob_step = bob.oracle.history_commitment(0, 37).await.unwrap();

    let mut fork_point = None;
    for _ in 0..MAX_ROUNDS {
        alice_trackers.round().await.unwrap();
        bob_trackers.round().await.unwrap();
        let opened = chain
            .call(|tx| {
                let Ok(v) = tx.vertex_by_history(challenge, &fork_history) else {
                    return Ok::<_, ChainError>(None);
                };
                Ok(tx.sub_challenge(v.id)?.map(|_| v.id))
            })
            .unwrap();
        if opened.is_some() {
            fork_point = opened;
            break;
        }
    }
    let fork_point = fork_point.expect("no sub-challenge was opened");

    let alice_37 = chain
        .call(|tx| {
            let fork = tx.vertex(fork_point)?;
            assert_eq!(fork.status, VertexStatus::Pending);
            assert_eq!(
                fork.sub_challenge.as_ref().map(|s| s.challenge_type),
                Some(ChallengeType::BigStep)
            );
            assert!(tx.children_at_one_step_fork(fork_point)?);
            let alice_37 = tx.vertex_by_history(challenge, &alice_step)?;
            let bob_37 = tx.vertex_by_history(challenge, &bob_step)?;
            assert_eq!(alice_37.prev, Some(fork_point));
            assert_eq!(bob_37.prev, Some(fork_point));
            // Shared history above the root was merged into a single vertex.
            let shared = tx.vertex_by_history(challenge, &shared_history)?;
            assert_eq!(tx.vertex(fork_point)?.prev, Some(shared.id));
            Ok::<_, ChainError>(alice_37.id)
        })
        .unwrap();

    // Both sides keep a tracker on the fork point's children.
    assert!(alice_trackers.tracked_vertices().contains(&alice_37));
    assert!(alice_trackers.state_of(alice_37).is_some());

    // The one-step prover settles the sub-challenge in alice's favour.
    chain
        .tx(|tx| tx.set_sub_challenge_winner(fork_point, alice_37))
        .unwrap();
    time.advance(2 * PERIOD + Duration::from_secs(1));

    let mut finished = false;
    for _ in 0..MAX_ROUNDS {
        let alice_live = alice_trackers.round().await.unwrap();
        let bob_live = bob_trackers.round().await.unwrap();
        if alice_live == 0 && bob_live == 0 {
            finished = true;
            break;
        }
    }
    assert!(finished, "trackers never finished");

    chain
        .tx(|tx| {
            assert_eq!(tx.view().challenge_winner(challenge)?, alice_leaf.seq);
            tx.confirm_for_win(alice_leaf.seq)?;
            tx.reject_for_loss(bob_leaf.seq)?;
            Ok::<_, ChainError>(())
        })
        .unwrap();
    chain
        .call(|tx| {
            assert_eq!(tx.assertion(alice_leaf.seq)?.status, AssertionStatus::Confirmed);
            assert_eq!(tx.assertion(bob_leaf.seq)?.status, AssertionStatus::Rejected);
            assert_eq!(tx.latest_confirmed()?.seq, alice_leaf.seq);
            assert_eq!(tx.assertion(AssertionId::GENESIS)?.status, AssertionStatus::Confirmed);
            Ok::<_, ChainError>(())
        })
        .unwrap();
}

#[tokio::test]
async fn an_unopposed_leaf_wins_on_its_clock() {
    init_logging();
    let alice = Party::alice(11);
    let bob = Party::bob(11, 5);
    let (chain, time) = setup_chain(&[&alice, &bob]);

    let mut alice_trackers =
        DeterministicScheduler::new(chain.clone(), alice.oracle.clone(), &alice.config);
    let (spawner, _idle) = tokio::sync::mpsc::unbounded_channel();
    let alice_validator = Validator::new(
        chain.clone(),
        alice.oracle.clone(),
        &alice.config,
        alice_trackers.spawner(),
    );
    // Bob posts a rival leaf but never plays the game.
    let bob_validator = Validator::new(chain.clone(), bob.oracle.clone(), &bob.config, spawner);

    let alice_leaf = alice_validator.submit_leaf_creation().await.unwrap().unwrap();
    let bob_leaf = bob_validator.submit_leaf_creation().await.unwrap().unwrap();
    let request = alice_validator
        .process_leaf_creation(bob_leaf.seq)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(alice_trackers.round().await.unwrap(), 1);
    assert_eq!(
        alice_trackers.state_of(request.vertex),
        Some(TrackerState::Presumptive)
    );
    for _ in 0..3 {
        assert_eq!(alice_trackers.round().await.unwrap(), 1);
    }

    time.advance(PERIOD + Duration::from_secs(1));
    alice_trackers.round().await.unwrap();
    assert_eq!(alice_trackers.round().await.unwrap(), 0);
    let winner = chain
        .call(|tx| tx.challenge_winner(request.challenge))
        .unwrap();
    assert_eq!(winner, alice_leaf.seq);
}
