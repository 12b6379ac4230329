//! Consensus error types

use thiserror::Error;

/// Consensus error type
#[derive(Error, Debug, Clone)]
pub enum ConsensusError {
    /// Round construction requires at least one validator
    #[error("Empty validator set")]
    EmptyValidatorSet,

    /// Order index outside the round
    #[error("Invalid order {order}: round has {member_count} members")]
    InvalidOrder { order: u16, member_count: usize },

    /// Byzantine tolerance percent must lie strictly between 0 and 100
    #[error("Invalid byzantine percent: {0}")]
    InvalidByzantinePercent(u8),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session error
    #[error("Session error: {0}")]
    Session(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other error
    #[error("Consensus error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for ConsensusError {
    fn from(err: serde_json::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ConsensusError {
    fn from(err: anyhow::Error) -> Self {
        ConsensusError::Other(err.to_string())
    }
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;
