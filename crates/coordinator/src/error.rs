//! Error types for transactions

use crossbar_clock::TimeSourceError;
use crossbar_common::CodecError;
use crossbar_datastore::DatastoreError;
use thiserror::Error;

/// Transaction error types
///
/// Callers see one of four outcomes: success, a missing key, a conflict with
/// another transaction, or a failure of a named backend.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    #[error("No datastore named {0}")]
    DatastoreNotFound(String),

    #[error("Key {key} not found on {backend}")]
    KeyNotFound { backend: String, key: String },

    #[error("Conflict on {backend}: {source}")]
    Conflict {
        backend: String,
        #[source]
        source: DatastoreError,
    },

    #[error("Transaction {0} was aborted by a concurrent resolver")]
    Aborted(String),

    #[error("Backend {backend} failed: {source}")]
    Backend {
        backend: String,
        #[source]
        source: DatastoreError,
    },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Time source error: {0}")]
    TimeSource(#[from] TimeSourceError),
}

impl TransactionError {
    /// Classify a datastore failure on `backend`
    pub fn from_datastore(backend: &str, error: DatastoreError) -> Self {
        let backend = backend.to_string();
        match error {
            DatastoreError::KeyNotFound(key) => TransactionError::KeyNotFound { backend, key },
            e @ (DatastoreError::VersionMismatch(_)
            | DatastoreError::KeyExists(_)
            | DatastoreError::ReadFailed(_)
            | DatastoreError::DirtyRead(_)) => TransactionError::Conflict { backend, source: e },
            e => TransactionError::Backend { backend, source: e },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransactionError::KeyNotFound { .. })
    }

    /// Lost to a concurrent transaction; retrying may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            TransactionError::Conflict { .. } | TransactionError::Aborted(_)
        )
    }

    /// Backend the failure came from, when there is one
    pub fn backend(&self) -> Option<&str> {
        match self {
            TransactionError::KeyNotFound { backend, .. }
            | TransactionError::Conflict { backend, .. }
            | TransactionError::Backend { backend, .. } => Some(backend),
            _ => None,
        }
    }
}

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, TransactionError>;
