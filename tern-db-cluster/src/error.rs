//! Error types for cluster sync

use thiserror::Error;

/// Result type alias using our SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

/// Cluster sync errors
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Error from tern-db-core
    #[error(transparent)]
    Core(#[from] tern_db_core::Error),

    /// Local and expected data hashes diverged after a forced resync
    #[error("Data hash mismatch: {0}")]
    DataHashMismatch(String),

    /// The node role changed away from leader under a waiter
    #[error("Wrong replication data: {0}")]
    ReplicationState(String),

    /// Sync was terminated
    #[error("Terminated: {0}")]
    Terminated(String),

    /// Peer connection failure
    #[error("Network error: {0}")]
    Network(String),
}

impl SyncError {
    /// Flatten into the core error for the RPC boundary
    pub fn into_core(self) -> tern_db_core::Error {
        match self {
            SyncError::Core(e) => e,
            SyncError::DataHashMismatch(m) => tern_db_core::Error::DataHashMismatch(m),
            SyncError::ReplicationState(m) => tern_db_core::Error::ReplicationState(m),
            SyncError::Terminated(m) => tern_db_core::Error::Terminated(m),
            SyncError::Network(m) => tern_db_core::Error::Network(m),
        }
    }
}
