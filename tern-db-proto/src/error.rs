//! Error types for the RPC protocol

use thiserror::Error;

/// Result type alias using our ProtoError
pub type Result<T> = std::result::Result<T, ProtoError>;

/// RPC protocol errors
#[derive(Error, Debug, Clone)]
pub enum ProtoError {
    /// Error from tern-db-core (includes wire-carried server errors)
    #[error(transparent)]
    Core(#[from] tern_db_core::Error),

    /// Framing/version violation
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Call deadline expired
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Call cancelled (reconnect or shutdown)
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl ProtoError {
    /// Flatten into the core error for callers above the protocol layer
    pub fn into_core(self) -> tern_db_core::Error {
        match self {
            ProtoError::Core(e) => e,
            ProtoError::ProtocolMismatch(m) => tern_db_core::Error::ProtocolMismatch(m),
            ProtoError::Network(m) => tern_db_core::Error::Network(m),
            ProtoError::Timeout(m) => tern_db_core::Error::Timeout(m),
            ProtoError::Cancelled(m) => tern_db_core::Error::Cancelled(m),
        }
    }
}
