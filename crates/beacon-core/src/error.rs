//! Error types for the beacon distribution layer

use std::time::Duration;

use thiserror::Error;

/// Errors shared by every beacon crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BeaconError {
    // Upstream errors
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Stream closed")]
    StreamClosed,

    // Input errors
    #[error("Invalid round identifier: {0}")]
    InvalidRound(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    // Consistency errors
    #[error("No payload delivered for round {0}")]
    EmptyPayload(u64),

    // Setup errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BeaconError {
    /// True for errors that come from the caller giving up rather than the upstream failing
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BeaconError::Cancelled)
    }
}

/// Result type for beacon operations
pub type BeaconResult<T> = Result<T, BeaconError>;
