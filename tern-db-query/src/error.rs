//! Error types for query execution

use thiserror::Error;

/// Result type alias using our QueryError
pub type Result<T> = std::result::Result<T, QueryError>;

/// Query execution errors
#[derive(Error, Debug)]
pub enum QueryError {
    /// Error from tern-db-core
    #[error(transparent)]
    Core(#[from] tern_db_core::Error),

    /// Invalid query structure
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Unknown field/index under active strict mode
    #[error("Strict mode: {0}")]
    StrictMode(String),

    /// Aggregation over incompatible value types
    #[error("Invalid aggregation: {0}")]
    InvalidAggregation(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        QueryError::InvalidQuery(msg.into())
    }

    pub fn strict_mode(msg: impl Into<String>) -> Self {
        QueryError::StrictMode(msg.into())
    }

    /// Flatten into the core error for the RPC boundary
    pub fn into_core(self) -> tern_db_core::Error {
        match self {
            QueryError::Core(e) => e,
            QueryError::InvalidQuery(m) => tern_db_core::Error::InvalidQuery(m),
            QueryError::StrictMode(m) => tern_db_core::Error::StrictMode(m),
            QueryError::InvalidAggregation(m) => tern_db_core::Error::InvalidAggregation(m),
            QueryError::Internal(m) => tern_db_core::Error::Internal(m),
        }
    }
}
