use std::fmt;

/// Result type for hivetrace-metrics operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the metrics layer.
///
/// Cache failures never surface here; they are queued for deferred sync and
/// the call succeeds.
#[derive(Debug)]
pub enum Error {
    /// Durable store write or query failed; fatal to the call
    Store(hivetrace_store::Error),

    /// Unknown agent id on a lifecycle call
    UnknownAgent(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::UnknownAgent(id) => write!(f, "Unknown agent: {}", id),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::UnknownAgent(_) => None,
        }
    }
}

impl From<hivetrace_store::Error> for Error {
    fn from(err: hivetrace_store::Error) -> Self {
        Error::Store(err)
    }
}
