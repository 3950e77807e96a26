use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::merkle::{MerkleError, MerkleExpansion};

/// A SHA-256 digest. The all-zero value marks an empty slot or an absent commitment.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    BorshDeserialize,
    BorshSerialize,
)]
#[cfg_attr(any(test, feature = "fuzzing"), derive(proptest_derive::Arbitrary))]
pub struct Hash([u8; 32]);

impl Hash {
    /// The zero digest.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Wraps raw digest bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns true for [`Hash::ZERO`].
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Hashes the concatenation of `parts`.
    pub fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    /// An interior Merkle node.
    pub fn pair(left: &Hash, right: &Hash) -> Self {
        Self::digest(&[&left.0, &right.0])
    }

    /// Hash of a big-endian integer. Handy for deriving distinct, reproducible digests.
    pub fn for_u64(value: u64) -> Self {
        Self::digest(&[&value.to_be_bytes()])
    }

    /// Raw bytes.
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Short form for log lines.
        write!(f, "0x{}", hex::encode(&self.0[..4]))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl From<Hash> for [u8; 32] {
    fn from(value: Hash) -> Self {
        value.0
    }
}

/// An account on the ledger. Stakers, challengers and validators are identified by it.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize,
)]
#[cfg_attr(any(test, feature = "fuzzing"), derive(proptest_derive::Arbitrary))]
pub struct Address([u8; 20]);

impl Address {
    /// Creates an address containing the given bytes.
    pub const fn new(addr: [u8; 20]) -> Self {
        Self(addr)
    }

    /// An address with every byte set to `byte`.
    pub const fn repeat_byte(byte: u8) -> Self {
        Self([byte; 20])
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            Serialize::serialize(&self.to_string(), serializer)
        } else {
            Serialize::serialize(&self.0, serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let hex_addr: String = Deserialize::deserialize(deserializer)?;
            Address::from_str(&hex_addr).map_err(serde::de::Error::custom)
        } else {
            let addr = <[u8; 20] as Deserialize>::deserialize(deserializer)?;
            Ok(Address(addr))
        }
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let addr = hex::decode(s).map_err(anyhow::Error::msg)?;
        Address::try_from(addr.as_slice())
    }
}

impl<'a> TryFrom<&'a [u8]> for Address {
    type Error = anyhow::Error;

    fn try_from(addr: &'a [u8]) -> Result<Self, Self::Error> {
        if addr.len() != 20 {
            anyhow::bail!("Address must be 20 bytes long, got {}", addr.len());
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(addr);
        Ok(Self(bytes))
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 20]> for Address {
    fn from(addr: [u8; 20]) -> Self {
        Self(addr)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// The state of the chain at some execution height.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    BorshDeserialize,
    BorshSerialize,
)]
#[cfg_attr(any(test, feature = "fuzzing"), derive(proptest_derive::Arbitrary))]
pub struct StateCommitment {
    /// Execution height.
    pub height: u64,
    /// State root after executing up to `height`.
    pub state_root: Hash,
}

impl StateCommitment {
    /// Creates a new commitment.
    pub const fn new(height: u64, state_root: Hash) -> Self {
        Self { height, state_root }
    }

    /// Digest binding both the height and the root.
    pub fn hash(&self) -> Hash {
        Hash::digest(&[&self.height.to_be_bytes(), self.state_root.as_ref()])
    }
}

/// A binding commitment to a sequence of `height + 1` step results.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    BorshDeserialize,
    BorshSerialize,
)]
#[cfg_attr(any(test, feature = "fuzzing"), derive(proptest_derive::Arbitrary))]
pub struct HistoryCommitment {
    /// Index of the last step covered.
    pub height: u64,
    /// Merkle root over all covered steps.
    pub merkle: Hash,
}

impl HistoryCommitment {
    /// Creates a new commitment.
    pub const fn new(height: u64, merkle: Hash) -> Self {
        Self { height, merkle }
    }

    /// Commits to a non-empty sequence of leaves.
    pub fn from_leaves(leaves: &[Hash]) -> Result<Self, MerkleError> {
        let height = (leaves.len() as u64)
            .checked_sub(1)
            .ok_or(MerkleError::InvalidHeight)?;
        let merkle = MerkleExpansion::from_leaves(leaves).root();
        Ok(Self { height, merkle })
    }

    /// Digest binding both the height and the root.
    pub fn hash(&self) -> Hash {
        Hash::digest(&[&self.height.to_be_bytes(), self.merkle.as_ref()])
    }
}

/// Granularity of a challenge. Each one-step fork opens a sub-challenge one level finer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    BorshDeserialize,
    BorshSerialize,
)]
#[repr(u8)]
pub enum ChallengeType {
    /// Disputes over blocks between two assertions.
    Block = 1,
    /// Disputes over big steps within a single block.
    BigStep = 2,
    /// Disputes over single machine steps within one big step.
    SmallStep = 3,
}

impl ChallengeType {
    /// The level a one-step fork at this level escalates to, if any.
    pub fn next_level(self) -> Option<ChallengeType> {
        match self {
            ChallengeType::Block => Some(ChallengeType::BigStep),
            ChallengeType::BigStep => Some(ChallengeType::SmallStep),
            ChallengeType::SmallStep => None,
        }
    }

    /// The level whose one-step forks open challenges of this level.
    pub fn prev_level(self) -> Option<ChallengeType> {
        match self {
            ChallengeType::Block => None,
            ChallengeType::BigStep => Some(ChallengeType::Block),
            ChallengeType::SmallStep => Some(ChallengeType::BigStep),
        }
    }
}

impl Display for ChallengeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChallengeType::Block => "block",
            ChallengeType::BigStep => "big_step",
            ChallengeType::SmallStep => "small_step",
        };
        f.write_str(name)
    }
}
