//! Connector error types

use thiserror::Error;

/// Result type for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Errors a backend connector can report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Version mismatch on {key}: expected {expected:?}, found {actual:?}")]
    VersionMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Atomic create lost the race; `existing` is the winning value
    #[error("Key already exists: {key}")]
    KeyExists { key: String, existing: String },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Connector error: {0}")]
    Other(String),
}

impl ConnectorError {
    /// Expected under contention; never a hard failure
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ConnectorError::VersionMismatch { .. } | ConnectorError::KeyExists { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ConnectorError::KeyNotFound(_))
    }
}
