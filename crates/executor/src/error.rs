//! Error types for the executor

use crossbar_datastore::DatastoreError;
use crossbar_engine::EngineError;
use crossbar_protocol::{ErrorKind, ParseError};
use thiserror::Error;

/// Executor error types
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Backend {0} is not served here")]
    UnknownBackend(String),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl ExecutorError {
    /// Wire class reported back to the client
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::UnknownBackend(_) => ErrorKind::Unavailable,
            ExecutorError::Datastore(e) => e.kind(),
            ExecutorError::Protocol(_) => ErrorKind::Deserialize,
            ExecutorError::Engine(_) => ErrorKind::Unavailable,
        }
    }
}

/// Result type for executor operations
pub type Result<T> = std::result::Result<T, ExecutorError>;
