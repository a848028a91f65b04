//! Error types for tern-db-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
///
/// Every variant maps to a stable numeric code via [`Error::code`] so the
/// RPC boundary and client retry policies can key on it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Query structure failed parse/validation
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Type/value coercion failed, or an ambiguous merge annihilation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Aggregation over incompatible value types
    #[error("Invalid aggregation: {0}")]
    InvalidAggregation(String),

    /// Unknown field/index under active strict-mode
    #[error("Strict mode: {0}")]
    StrictMode(String),

    /// Namespace, tx, or key missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate PK on insert; namespace already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The cancel context was explicitly cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The cancel context deadline expired
    #[error("Timeout: {0}")]
    Timeout(String),

    /// RPC transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// RPC framing/version mismatch
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Node role changed under a waiter
    #[error("Wrong replication data: {0}")]
    ReplicationState(String),

    /// Leader sync verify failed after forced resync
    #[error("Data hash mismatch: {0}")]
    DataHashMismatch(String),

    /// Server is shutting down
    #[error("Terminated: {0}")]
    Terminated(String),

    /// Storage layout failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invariant violation; never produced by external input
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable numeric code for the RPC boundary
    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidQuery(_) => 1,
            Error::InvalidArgument(_) => 2,
            Error::InvalidAggregation(_) => 3,
            Error::StrictMode(_) => 4,
            Error::NotFound(_) => 5,
            Error::Conflict(_) => 6,
            Error::Cancelled(_) => 7,
            Error::Timeout(_) => 8,
            Error::Network(_) => 9,
            Error::ProtocolMismatch(_) => 10,
            Error::ReplicationState(_) => 11,
            Error::DataHashMismatch(_) => 12,
            Error::Terminated(_) => 13,
            Error::Storage(_) => 14,
            Error::Internal(_) => 15,
        }
    }

    /// Rebuild an error from a wire `(code, message)` pair
    pub fn from_code(code: u32, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match code {
            1 => Error::InvalidQuery(msg),
            2 => Error::InvalidArgument(msg),
            3 => Error::InvalidAggregation(msg),
            4 => Error::StrictMode(msg),
            5 => Error::NotFound(msg),
            6 => Error::Conflict(msg),
            7 => Error::Cancelled(msg),
            8 => Error::Timeout(msg),
            9 => Error::Network(msg),
            10 => Error::ProtocolMismatch(msg),
            11 => Error::ReplicationState(msg),
            12 => Error::DataHashMismatch(msg),
            13 => Error::Terminated(msg),
            14 => Error::Storage(msg),
            _ => Error::Internal(msg),
        }
    }

    /// Create an invalid query error
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Error::InvalidQuery(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Create a strict mode violation error
    pub fn strict_mode(msg: impl Into<String>) -> Self {
        Error::StrictMode(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        let errs = [
            Error::InvalidQuery("q".into()),
            Error::Timeout("t".into()),
            Error::DataHashMismatch("h".into()),
            Error::Terminated("x".into()),
        ];
        for e in errs {
            let back = Error::from_code(e.code(), e.to_string());
            assert_eq!(back.code(), e.code());
        }
    }
}
