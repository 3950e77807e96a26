#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod bisection;
mod commitments;
pub mod merkle;
pub mod services;
pub mod time;

#[cfg(feature = "mocks")]
pub mod mocks;

pub use bisection::{bisection_point, BisectionError};
pub use commitments::*;
pub use merkle::{MerkleError, MerkleExpansion};
pub use time::{SystemTimeReference, TimeReference, Timestamp};
