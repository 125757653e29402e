//! Error taxonomy shared by the engine and its collaborators.

use thiserror::Error;

pub type SimResult<T> = std::result::Result<T, SimError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// Invalid group parameters, unknown references, violated trade-offs.
    /// Raised before a run starts; the run never begins.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Corrupted engine state (orphaned particle, negative mass, expired timer
    /// left alive). The run aborts immediately.
    #[error("state invariant violated: {0}")]
    InvariantViolation(String),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Configuration(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        SimError::InvariantViolation(msg.into())
    }
}
