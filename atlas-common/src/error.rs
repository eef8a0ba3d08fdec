//! Error types for the Atlas workspace.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using the Atlas error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading, validating, or saving configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file could not be understood
    #[error("Configuration error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// Configuration parsed but failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ValidationError),

    /// IO error on a configuration path
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn config(path: &Path, reason: impl ToString) -> Self {
        Self::Config {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_path() {
        let err = Error::io(
            Path::new("/etc/atlas/config.json"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "IO error at /etc/atlas/config.json: denied");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_validation_error_converts() {
        let err: Error = ValidationError::Conflict {
            reason: "spans overlap".into(),
        }
        .into();
        assert!(matches!(err, Error::Invalid(_)));
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Configuration conflict: spans overlap"
        );
    }
}
