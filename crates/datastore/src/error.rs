//! Error types for the datastore engine

use crossbar_clock::TimeSourceError;
use crossbar_connector::ConnectorError;
use crossbar_protocol::ErrorKind;
use crossbar_record::RecordError;
use thiserror::Error;

/// Result type for datastore operations
pub type Result<T> = std::result::Result<T, DatastoreError>;

/// Errors surfaced by datastore engines, resolvers and group key maintenance
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Version mismatch: {0}")]
    VersionMismatch(String),

    #[error("Key already exists: {0}")]
    KeyExists(String),

    #[error("Deserialize error: {0}")]
    Deserialize(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    /// Pessimistic refusal to read an unresolved record
    #[error("Read failed for {0}: owning transaction is unresolved")]
    ReadFailed(String),

    /// A speculative read turned out to be wrong
    #[error("Dirty read: {0}")]
    DirtyRead(String),

    #[error("Version chain error: {0}")]
    Chain(String),

    #[error("Group key error: {0}")]
    GroupKey(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Datastore {0} used before start")]
    NotStarted(String),

    #[error("Time source error: {0}")]
    TimeSource(#[from] TimeSourceError),
}

impl DatastoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatastoreError::KeyNotFound(_))
    }

    /// Expected under contention
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DatastoreError::VersionMismatch(_) | DatastoreError::KeyExists(_)
        )
    }

    /// Wire class used by the remote protocol
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatastoreError::KeyNotFound(_) => ErrorKind::KeyNotFound,
            DatastoreError::VersionMismatch(_) => ErrorKind::VersionMismatch,
            DatastoreError::KeyExists(_) => ErrorKind::KeyExists,
            DatastoreError::Deserialize(_) => ErrorKind::Deserialize,
            DatastoreError::ReadFailed(_) => ErrorKind::ReadFailed,
            DatastoreError::DirtyRead(_) => ErrorKind::DirtyRead,
            DatastoreError::Backend(_) => ErrorKind::Unavailable,
            _ => ErrorKind::Other,
        }
    }

    /// Rebuild an error reported by a remote executor
    pub fn from_remote(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::KeyNotFound => DatastoreError::KeyNotFound(message),
            ErrorKind::VersionMismatch => DatastoreError::VersionMismatch(message),
            ErrorKind::KeyExists => DatastoreError::KeyExists(message),
            ErrorKind::Deserialize => DatastoreError::Deserialize(message),
            ErrorKind::ReadFailed => DatastoreError::ReadFailed(message),
            ErrorKind::DirtyRead => DatastoreError::DirtyRead(message),
            ErrorKind::Unavailable => DatastoreError::Backend(message),
            ErrorKind::Other => DatastoreError::Remote(message),
        }
    }
}

impl From<ConnectorError> for DatastoreError {
    fn from(e: ConnectorError) -> Self {
        match e {
            ConnectorError::KeyNotFound(key) => DatastoreError::KeyNotFound(key),
            ConnectorError::VersionMismatch { .. } => DatastoreError::VersionMismatch(e.to_string()),
            ConnectorError::KeyExists { key, .. } => DatastoreError::KeyExists(key),
            ConnectorError::Unavailable(_) | ConnectorError::Other(_) => {
                DatastoreError::Backend(e.to_string())
            }
        }
    }
}

impl From<RecordError> for DatastoreError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::Serialize(msg) => DatastoreError::Serialize(msg),
            RecordError::Deserialize(msg) => DatastoreError::Deserialize(msg),
            RecordError::ChainTruncation { .. } => DatastoreError::Chain(e.to_string()),
            RecordError::InvalidLocation(_) => DatastoreError::GroupKey(e.to_string()),
        }
    }
}
