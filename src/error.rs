//! Error types for the persistence layer and the store façades.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O on '{path}' failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Written data could not be verified: '{0}'")]
    VerificationFailed(PathBuf),

    #[error("A target location with path '{0}' already exists")]
    DuplicatePath(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Short message for notifications in the UI.
    pub fn to_frontend_message(&self) -> String {
        match self {
            StoreError::DuplicatePath(path) => {
                format!("This location already exists: {}", path)
            }
            StoreError::NotFound(what) => format!("Not found: {}", what),
            StoreError::Io { path, .. } => {
                format!("Could not access {}", path.display())
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frontend_message_for_duplicate() {
        let err = StoreError::DuplicatePath("\\\\srv\\share".to_string());
        assert!(err.to_frontend_message().contains("already exists"));
    }
}
