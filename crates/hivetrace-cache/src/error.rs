use std::fmt;

/// Result type for hivetrace-cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the cache layer
#[derive(Debug)]
pub enum Error {
    /// Circuit is open or the transport is down; callers fall back to the
    /// durable store or the sync queue
    Unavailable(String),

    /// Command exceeded its deadline
    Timeout(String),

    /// Underlying Redis failure
    Redis(redis::RedisError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Unavailable(msg) => write!(f, "Cache unavailable: {}", msg),
            Error::Timeout(msg) => write!(f, "Cache timeout: {}", msg),
            Error::Redis(err) => write!(f, "Redis error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Redis(err) => Some(err),
            Error::Unavailable(_) | Error::Timeout(_) => None,
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Redis(err)
    }
}
