//! Test doubles for the collaborator traits and the clock.

mod execution;
mod metadata;
mod time;

pub use execution::SimulatedExecution;
pub use metadata::MockMetadataReader;
pub use time::ArtificialTimeReference;
