use sov_challenge_interface::{BisectionError, MerkleError};

/// Failures of ledger operations.
///
/// Most variants are preconditions that may hold later or with different input. `ProofInvalid`,
/// `InvalidHeight` and `InsufficientBalance` point at malformed or malicious input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The assertion belongs to a different ledger.
    #[error("assertion belongs to a different chain")]
    WrongChain,
    /// A new assertion must be higher than its parent.
    #[error("assertion height {height} must exceed parent height {parent_height}")]
    WrongHeight {
        /// Height of the new assertion.
        height: u64,
        /// Height of its parent.
        parent_height: u64,
    },
    /// A history commitment is at the wrong height for the move.
    #[error("invalid height: expected {expected}, got {actual}")]
    InvalidHeight {
        /// Height the move requires.
        expected: u64,
        /// Height supplied.
        actual: u64,
    },
    /// The assertion or vertex already exists.
    #[error("already exists")]
    AlreadyExists,
    /// The assertion already has a challenge.
    #[error("challenge already exists on assertion")]
    ChallengeAlreadyExists,
    /// A staker tried to challenge the assertion it staked on.
    #[error("cannot challenge own leaf")]
    CannotChallengeOwnLeaf,
    /// The deadline for this operation has not passed yet.
    #[error("deadline has not yet passed")]
    NotYet,
    /// The deadline for this operation has passed.
    #[error("deadline has passed")]
    PastDeadline,
    /// The object's status does not allow this operation.
    #[error("state does not allow this operation")]
    WrongState,
    /// The predecessor's status does not allow this operation.
    #[error("predecessor state does not allow this operation")]
    WrongPredecessorState,
    /// The operation can never succeed on these arguments.
    #[error("invalid operation: {0}")]
    InvalidOp(&'static str),
    /// The challenge has not been decided.
    #[error("challenge does not yet have a winner")]
    NoWinnerYet,
    /// The account cannot cover the stake.
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance {
        /// Amount requested.
        needed: u64,
        /// Amount held.
        available: u64,
    },
    /// A prefix proof did not verify.
    #[error("prefix proof failed to verify")]
    ProofInvalid,
    /// No object with this identifier.
    #[error("{kind} {id} not found")]
    NotFound {
        /// What was looked up.
        kind: &'static str,
        /// The identifier.
        id: u64,
    },
    /// The range cannot be bisected.
    #[error(transparent)]
    Bisection(#[from] BisectionError),
    /// A Merkle operation failed for a reason other than a bad proof.
    #[error(transparent)]
    Merkle(MerkleError),
}

impl From<MerkleError> for ChainError {
    fn from(err: MerkleError) -> Self {
        match err {
            MerkleError::ProofInvalid => ChainError::ProofInvalid,
            other => ChainError::Merkle(other),
        }
    }
}
