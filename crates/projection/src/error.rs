//! Error types for event projection and dispatch.

use hybrid_store::{ChainId, StoreError};
use thiserror::Error;

/// Errors that make one event or block tick fail.
///
/// Duplicate deliveries and updates of absent rows are not errors; they are
/// reported through [`EventOutcome`](crate::EventOutcome) and logged.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Record store failure. The event's transaction was rolled back.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Input that fails required-field validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A statistics counter would exceed `u64::MAX`.
    #[error("counter {counter} overflowed on chain {chain_id}")]
    CounterOverflow {
        chain_id: ChainId,
        counter: &'static str,
    },

    /// Commitment list could not be encoded or decoded.
    #[error("commitment codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for ProjectionError {
    fn from(err: serde_json::Error) -> Self {
        ProjectionError::Codec(err.to_string())
    }
}

/// Result type for projection operations.
pub type ProjectionResult<T> = Result<T, ProjectionError>;

/// Errors surfaced by the per-chain dispatcher itself.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The chain's worker has stopped (after a failed input) and no longer
    /// accepts input.
    #[error("worker for chain {0} has stopped")]
    Closed(ChainId),

    /// The chain's worker task panicked or was cancelled.
    #[error("worker for chain {chain_id} did not finish: {reason}")]
    Worker { chain_id: ChainId, reason: String },
}
