pub mod applier;
pub mod cluster;
pub mod config;
pub mod error;
pub mod executor;
pub mod outcome;
pub mod plan;
pub mod redact;
pub mod sequencer;
pub mod sink;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{BringupError, Result};
pub use outcome::{Failure, FailureKind, Outcome};
