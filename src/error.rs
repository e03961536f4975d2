use thiserror::Error;

use crate::{action::StageError, store::StorageError};

/// Errors surfaced to the presentation layer by operations and the session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Shared-state store is unreachable or gave up on a transaction.
    #[error("store unavailable")]
    Unavailable(#[source] StorageError),
    /// Acting player is not allowed to perform the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed against the current shared state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested document does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::Unavailable(err)
    }
}

impl From<StageError> for SyncError {
    fn from(err: StageError) -> Self {
        SyncError::InvalidState(err.to_string())
    }
}
