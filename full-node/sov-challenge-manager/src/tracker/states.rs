use std::fmt::{Display, Formatter};

use crate::fsm::{Fsm, FsmError, Transition};

/// Where a vertex tracker is in its dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerState {
    /// Needs to work out what the vertex should do next.
    Started,
    /// The vertex is its parent's presumptive successor and waits for its clock.
    Presumptive,
    /// The vertex and a rival sit one step above the same parent.
    AtOneStepFork,
    /// A small step fork, settled by a one-step proof.
    AtOneStepProof,
    /// Opening a sub-challenge on the fork point.
    OpeningSubchallenge,
    /// Joining the sub-challenge.
    AddingSubchallengeLeaf,
    /// Waiting for the sub-challenge to pick a winner.
    AwaitingSubchallengeResolution,
    /// Splitting the vertex's range.
    Bisecting,
    /// Joining an existing vertex at the bisection point.
    Merging,
    /// The vertex was confirmed. Terminal.
    Confirming,
}

impl Display for TrackerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrackerState::Started => "started",
            TrackerState::Presumptive => "presumptive",
            TrackerState::AtOneStepFork => "at_one_step_fork",
            TrackerState::AtOneStepProof => "at_one_step_proof",
            TrackerState::OpeningSubchallenge => "opening_subchallenge",
            TrackerState::AddingSubchallengeLeaf => "adding_subchallenge_leaf",
            TrackerState::AwaitingSubchallengeResolution => "awaiting_subchallenge_resolution",
            TrackerState::Bisecting => "bisecting",
            TrackerState::Merging => "merging",
            TrackerState::Confirming => "confirming",
        };
        f.write_str(name)
    }
}

/// Events moving a tracker between [`TrackerState`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerAction {
    /// Start over from [`TrackerState::Started`].
    BackToStart,
    /// The vertex is the presumptive successor.
    MarkPresumptive,
    /// The vertex reached a one-step fork.
    OneStepFork,
    /// Settle the fork with a one-step proof.
    OneStepProof,
    /// Open a sub-challenge on the fork point.
    OpenSubchallenge,
    /// Join the sub-challenge.
    OpenSubchallengeLeaf,
    /// Wait for the sub-challenge.
    AwaitSubchallengeResolution,
    /// Bisect the vertex.
    Bisect,
    /// Merge into the vertex at the bisection point.
    Merge,
    /// The vertex was confirmed.
    ConfirmWinner,
}

pub(super) fn tracker_fsm() -> Result<Fsm<TrackerState, TrackerAction>, FsmError> {
    use TrackerAction::*;
    use TrackerState::*;

    Fsm::new(
        Started,
        vec![
            Transition {
                event: BackToStart,
                from: vec![
                    Presumptive,
                    Bisecting,
                    Merging,
                    OpeningSubchallenge,
                    AddingSubchallengeLeaf,
                ],
                to: Started,
            },
            Transition {
                event: MarkPresumptive,
                from: vec![Started],
                to: Presumptive,
            },
            Transition {
                event: OneStepFork,
                from: vec![Started],
                to: AtOneStepFork,
            },
            Transition {
                event: OneStepProof,
                from: vec![AtOneStepFork],
                to: AtOneStepProof,
            },
            Transition {
                event: OpenSubchallenge,
                from: vec![AtOneStepFork],
                to: OpeningSubchallenge,
            },
            Transition {
                event: OpenSubchallengeLeaf,
                from: vec![OpeningSubchallenge],
                to: AddingSubchallengeLeaf,
            },
            Transition {
                event: AwaitSubchallengeResolution,
                from: vec![AddingSubchallengeLeaf],
                to: AwaitingSubchallengeResolution,
            },
            Transition {
                event: Bisect,
                from: vec![Started],
                to: Bisecting,
            },
            Transition {
                event: Merge,
                from: vec![Bisecting],
                to: Merging,
            },
            Transition {
                event: ConfirmWinner,
                from: vec![Presumptive, AtOneStepProof, AwaitingSubchallengeResolution],
                to: Confirming,
            },
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_valid() {
        let fsm = tracker_fsm().unwrap();
        assert_eq!(fsm.current(), TrackerState::Started);
    }

    #[test]
    fn sub_challenge_path() {
        let mut fsm = tracker_fsm().unwrap();
        for action in [
            TrackerAction::OneStepFork,
            TrackerAction::OpenSubchallenge,
            TrackerAction::OpenSubchallengeLeaf,
            TrackerAction::AwaitSubchallengeResolution,
            TrackerAction::ConfirmWinner,
        ] {
            fsm.do_transition(action).unwrap();
        }
        assert_eq!(fsm.current(), TrackerState::Confirming);
    }

    #[test]
    fn confirmed_trackers_stay_confirmed() {
        let mut fsm = tracker_fsm().unwrap();
        fsm.do_transition(TrackerAction::MarkPresumptive).unwrap();
        fsm.do_transition(TrackerAction::ConfirmWinner).unwrap();
        for action in [
            TrackerAction::BackToStart,
            TrackerAction::Bisect,
            TrackerAction::MarkPresumptive,
        ] {
            assert!(fsm.do_transition(action).is_err());
        }
    }

    #[test]
    fn merging_only_follows_a_bisection_attempt() {
        let mut fsm = tracker_fsm().unwrap();
        assert!(!fsm.can(TrackerAction::Merge));
        fsm.do_transition(TrackerAction::Bisect).unwrap();
        assert!(fsm.can(TrackerAction::Merge));
        fsm.do_transition(TrackerAction::Merge).unwrap();
        fsm.do_transition(TrackerAction::BackToStart).unwrap();
        assert_eq!(fsm.current(), TrackerState::Started);
    }
}
