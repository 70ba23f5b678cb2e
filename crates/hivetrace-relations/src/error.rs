use std::fmt;

/// Result type for hivetrace-relations operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the relationship layer
#[derive(Debug)]
pub enum Error {
    /// Storage layer error
    Store(hivetrace_store::Error),

    /// Inserting the edge would create a cycle
    Cycle(String),

    /// Unknown session or edge
    NotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Cycle(msg) => write!(f, "Cycle detected: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Cycle(_) | Error::NotFound(_) => None,
        }
    }
}

impl From<hivetrace_store::Error> for Error {
    fn from(err: hivetrace_store::Error) -> Self {
        Error::Store(err)
    }
}
