use thiserror::Error;

use crate::types::{PartitionId, SpaceId};

/// Result alias used throughout the chain commit layer.
pub type Result<T> = std::result::Result<T, ChainError>;

/// Failures reported by the local key-value store collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("partition {space}/{part} not found")]
    PartitionNotFound { space: SpaceId, part: PartitionId },
    #[error("partition {space}/{part} is not led by this node")]
    NotLeader { space: SpaceId, part: PartitionId },
    #[error("batch write rejected: {0}")]
    Write(String),
}

/// Permanent errors returned by the remote (in-edge) partition.
///
/// These never change on retry, so the coordinator aborts when it sees one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("edge not found on remote partition")]
    EdgeNotFound,
    #[error("request term is outdated")]
    OutdatedTerm,
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("remote store failure: {0}")]
    Store(String),
}

/// Terminal result codes of the chain coordinators and resume reconstructors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("write conflict on edge {key}")]
    WriteConflict { key: String },
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    #[error("leader changed")]
    LeaderChanged,
    #[error("vertex id spec of space {0} cannot be resolved")]
    InvalidSpaceConfig(SpaceId),
    #[error("partition {space}/{part} not found")]
    PartitionNotFound { space: SpaceId, part: PartitionId },
    #[error("remote partition rejected the request: {0}")]
    Remote(#[from] RemoteError),
    #[error("decode error: {0}")]
    Decode(&'static str),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("edge not found")]
    EdgeNotFound,
}

impl ChainError {
    pub(crate) fn conflict(key: impl Into<String>) -> Self {
        ChainError::WriteConflict { key: key.into() }
    }
}
