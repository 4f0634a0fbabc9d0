//! Error types for keel.

use thiserror::Error;

use crate::types::{ParseReplicaPlacementError, ParseTtlError};

/// A specialized `Result` type for keel core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in keel core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A replica placement string could not be parsed.
    #[error(transparent)]
    ReplicaPlacement(#[from] ParseReplicaPlacementError),

    /// A TTL string could not be parsed.
    #[error(transparent)]
    Ttl(#[from] ParseTtlError),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Returns true if the error was caused by caller input rather than the environment.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::ReplicaPlacement(_)
            | Self::Ttl(_)
            | Self::InvalidRequest(_) => true,
            Self::Io(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("missing url".to_string());
        assert_eq!(err.to_string(), "configuration error: missing url");
        assert!(err.is_user_error());

        let err: Error = "3x1".parse::<crate::ReplicaPlacement>().unwrap_err().into();
        assert_eq!(
            err.to_string(),
            "invalid replica placement '3x1': expected up to three digits such as '001'"
        );
    }

    #[test]
    fn test_io_error_is_not_user_error() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(!err.is_user_error());
    }
}
