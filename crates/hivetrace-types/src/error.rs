use std::fmt;

/// Result type for hivetrace-types operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the types layer
#[derive(Debug)]
pub enum Error {
    /// Hook event type string not in the known set
    UnknownHookType(String),

    /// A required event field was missing or malformed
    InvalidEvent(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownHookType(name) => write!(f, "Unknown hook event type: {}", name),
            Error::InvalidEvent(msg) => write!(f, "Invalid event: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
