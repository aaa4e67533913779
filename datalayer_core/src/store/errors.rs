use thiserror::Error;

/// Errors reported by a store client or one of its connections.
///
/// Cloneable so one failed connect attempt can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{0} does not exist")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("connection is closed")]
    Closed,

    #[error("driver error: {0}")]
    Driver(String),
}
