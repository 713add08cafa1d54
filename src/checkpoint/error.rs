use thiserror::Error;

use crate::crypto::{Hash, SignatureError};
use crate::storage::{ChainError, StorageError};

/// Checkpoint protocol errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Malformed checkpoint: {0}")]
    Malformed(String),
    #[error("Invalid signature on checkpoint {0}")]
    InvalidSignature(Hash),
    #[error("Block index missing for checkpoint {0}")]
    MissingBlockIndex(Hash),
    #[error("Checkpoint {candidate} conflicts with sync-checkpoint {current}")]
    Conflict { candidate: Hash, current: Hash },
    #[error("Failed to make checkpoint {0} the best chain: {1}")]
    Reorganize(Hash, #[source] ChainError),
    #[error("Checkpoint {0} was not accepted")]
    Rejected(Hash),
    #[error("Checkpoint master key unavailable")]
    MissingPrivateKey,
    #[error("Private key does not match the checkpoint master public key")]
    KeyMismatch,
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
