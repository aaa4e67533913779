use std::fmt::{self, Display};

use thiserror::Error;

use crate::store::StoreError;

/// The closed set of connection-level failure kinds.
///
/// The discriminants are stable and double as the process exit status used by
/// [`FailFast`](crate::core::failure::FailFast).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionError = 1,
    ConnectionDrop = 2,
    ConnectionTimeout = 3,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConnectionError => "connection error",
            ErrorKind::ConnectionDrop => "connection drop",
            ErrorKind::ConnectionTimeout => "connection timeout",
        };
        write!(f, "{name}")
    }
}

/// A central error enum for everything the data layer reports to callers.
#[derive(Debug, Clone, Error)]
pub enum DataLayerError {
    /// The initial connect attempt failed.
    #[error("Unable to connect to the database: {source}")]
    Connection {
        #[source]
        source: StoreError,
    },

    /// An established connection reported an error, closed or timed out.
    #[error("Database connection failure ({kind}): {reason}")]
    ConnectionFailure { kind: ErrorKind, reason: String },

    /// A query was executed before the session acquired a connection.
    #[error("Not connected to the database")]
    NotConnected,

    #[error("Query failed: {0}")]
    Query(#[from] StoreError),
}

impl DataLayerError {
    /// The connection-level kind of this error, if it is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            DataLayerError::Connection { .. } => Some(ErrorKind::ConnectionError),
            DataLayerError::ConnectionFailure { kind, .. } => Some(*kind),
            DataLayerError::NotConnected | DataLayerError::Query(_) => None,
        }
    }
}
