//! An append-only Merkle accumulator over step results, and prefix proofs between
//! commitments it produces.
//!
//! A [`MerkleExpansion`] keeps one slot per tree level. Slot `i` holds the root of a complete
//! subtree of `2^i` leaves, or [`Hash::ZERO`] when the level is empty, so the occupied slots
//! mirror the binary representation of the number of leaves appended so far.

use crate::{Hash, HistoryCommitment};

/// Errors from building expansions and checking prefix proofs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    /// A subtree was appended above the highest level of the expansion.
    #[error("level {level} is out of range for an expansion with {len} levels")]
    InvalidLevel {
        /// Requested level.
        level: usize,
        /// Number of levels in the expansion.
        len: usize,
    },
    /// A subtree was appended while a smaller subtree is still incomplete.
    #[error("cannot append a subtree at level {level}: a lower level is occupied")]
    Misaligned {
        /// Requested level.
        level: usize,
    },
    /// The proof does not link the two commitments.
    #[error("prefix proof is invalid")]
    ProofInvalid,
    /// Heights are inconsistent with the data provided.
    #[error("invalid height")]
    InvalidHeight,
    /// More leaves were supplied than a commitment can cover.
    #[error("too many leaves")]
    TooManyLeaves,
}

/// Merkle mountain range over leaf hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleExpansion {
    levels: Vec<Hash>,
}

impl MerkleExpansion {
    /// An expansion with no leaves.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an expansion by appending each leaf in order.
    pub fn from_leaves(leaves: &[Hash]) -> Self {
        let mut expansion = Self::new();
        for leaf in leaves {
            expansion.append_leaf(*leaf);
        }
        expansion
    }

    /// Returns true when no leaves have been appended.
    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Hash::is_zero)
    }

    /// Number of leaves covered.
    pub fn size(&self) -> u64 {
        self.levels
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_zero())
            .fold(0u64, |acc, (level, _)| acc.saturating_add(1u64 << level))
    }

    /// Folds the partial subtree roots from the lowest level upwards. Empty levels above the
    /// first occupied one pad the accumulator on the right. An empty expansion has the zero root.
    pub fn root(&self) -> Hash {
        let mut accum: Option<Hash> = None;
        for slot in &self.levels {
            accum = match accum {
                None if slot.is_zero() => None,
                None => Some(*slot),
                Some(acc) if slot.is_zero() => Some(Hash::pair(&acc, &Hash::ZERO)),
                Some(acc) => Some(Hash::pair(slot, &acc)),
            };
        }
        accum.unwrap_or(Hash::ZERO)
    }

    /// The occupied slots from the lowest level up, and the number of leaves.
    pub fn compact(&self) -> (Vec<Hash>, u64) {
        let slots = self
            .levels
            .iter()
            .filter(|slot| !slot.is_zero())
            .copied()
            .collect();
        (slots, self.size())
    }

    /// Rebuilds an expansion of `size` leaves from the front of `compact`.
    /// Returns the expansion and the number of entries consumed.
    pub fn from_compact(compact: &[Hash], size: u64) -> Result<(Self, usize), MerkleError> {
        let num_levels = (u64::BITS - size.leading_zeros()) as usize;
        let mut levels = Vec::with_capacity(num_levels);
        let mut consumed = 0;
        for level in 0..num_levels {
            if size & (1u64 << level) == 0 {
                levels.push(Hash::ZERO);
                continue;
            }
            let slot = compact.get(consumed).ok_or(MerkleError::ProofInvalid)?;
            if slot.is_zero() {
                return Err(MerkleError::ProofInvalid);
            }
            levels.push(*slot);
            consumed += 1;
        }
        Ok((Self { levels }, consumed))
    }

    /// Appends the root of a complete subtree of `2^level` leaves.
    ///
    /// Every level below `level` must be empty. Completed pairs are merged upward like a
    /// binary carry. On error the expansion is unchanged.
    pub fn append_complete_subtree(&mut self, level: usize, hash: Hash) -> Result<(), MerkleError> {
        if self.levels.is_empty() {
            self.levels = vec![Hash::ZERO; level + 1];
            self.levels[level] = hash;
            return Ok(());
        }
        if level >= self.levels.len() {
            return Err(MerkleError::InvalidLevel {
                level,
                len: self.levels.len(),
            });
        }
        if self.levels[..level].iter().any(|slot| !slot.is_zero()) {
            return Err(MerkleError::Misaligned { level });
        }
        let mut carry = hash;
        for slot in self.levels.iter_mut().skip(level) {
            if slot.is_zero() {
                *slot = carry;
                return Ok(());
            }
            carry = Hash::pair(slot, &carry);
            *slot = Hash::ZERO;
        }
        self.levels.push(carry);
        Ok(())
    }

    /// Appends a single leaf. The leaf is hashed again so it can never be mistaken for an
    /// interior node.
    pub fn append_leaf(&mut self, leaf: Hash) {
        let mut carry = Hash::digest(&[leaf.as_ref()]);
        for slot in self.levels.iter_mut() {
            if slot.is_zero() {
                *slot = carry;
                return;
            }
            carry = Hash::pair(slot, &carry);
            *slot = Hash::ZERO;
        }
        self.levels.push(carry);
    }
}

/// Level of the next subtree to append when growing a tree of `size` leaves towards `target`.
///
/// Writing the two sizes as `xxxx0yyy` and `xxxx1zzz`, a non-zero `yyy` must first be completed
/// from its lowest set bit. Once it is zero, `zzz` is consumed from its highest set bit. When
/// both are zero a single subtree at the differing bit closes the gap.
fn next_subtree_level(size: u64, target: u64) -> usize {
    let first_diff_bit = 63 - (size ^ target).leading_zeros();
    let mask = (1u64 << first_diff_bit) - 1;
    let yyy = size & mask;
    let zzz = target & mask;
    if yyy != 0 {
        yyy.trailing_zeros() as usize
    } else if zzz != 0 {
        (63 - zzz.leading_zeros()) as usize
    } else {
        first_diff_bit as usize
    }
}

/// Proves that the `from_height + 1` leaves behind `from_expansion` are a prefix of those same
/// leaves followed by `remaining_leaves`.
///
/// The proof is the compacted prefix followed by the roots of the subtrees needed to grow it to
/// the full length.
pub fn generate_prefix_proof(
    from_height: u64,
    from_expansion: &MerkleExpansion,
    remaining_leaves: &[Hash],
) -> Result<Vec<Hash>, MerkleError> {
    let mut size = from_height.checked_add(1).ok_or(MerkleError::InvalidHeight)?;
    if from_expansion.size() != size {
        return Err(MerkleError::InvalidHeight);
    }
    let target = size
        .checked_add(remaining_leaves.len() as u64)
        .ok_or(MerkleError::TooManyLeaves)?;

    let (mut proof, _) = from_expansion.compact();
    let mut rest = remaining_leaves;
    while size < target {
        let level = next_subtree_level(size, target);
        let (subtree, tail) = rest.split_at(1usize << level);
        proof.push(MerkleExpansion::from_leaves(subtree).root());
        size += 1u64 << level;
        rest = tail;
    }
    Ok(proof)
}

/// Checks that `lo` commits to a prefix of the leaves `hi` commits to.
///
/// Any inconsistency, including `lo.height > hi.height`, is reported as
/// [`MerkleError::ProofInvalid`].
pub fn verify_prefix_proof(
    lo: &HistoryCommitment,
    hi: &HistoryCommitment,
    proof: &[Hash],
) -> Result<(), MerkleError> {
    if lo.height > hi.height {
        return Err(MerkleError::ProofInvalid);
    }
    let pre_size = lo.height.checked_add(1).ok_or(MerkleError::ProofInvalid)?;
    let post_size = hi.height.checked_add(1).ok_or(MerkleError::ProofInvalid)?;

    let (mut expansion, consumed) = MerkleExpansion::from_compact(proof, pre_size)?;
    if expansion.root() != lo.merkle {
        return Err(MerkleError::ProofInvalid);
    }

    let mut rest = &proof[consumed..];
    let mut size = pre_size;
    while size < post_size {
        let level = next_subtree_level(size, post_size);
        let (subtree_root, tail) = rest.split_first().ok_or(MerkleError::ProofInvalid)?;
        expansion
            .append_complete_subtree(level, *subtree_root)
            .map_err(|_| MerkleError::ProofInvalid)?;
        size += 1u64 << level;
        rest = tail;
    }
    if !rest.is_empty() || expansion.root() != hi.merkle {
        return Err(MerkleError::ProofInvalid);
    }
    Ok(())
}
