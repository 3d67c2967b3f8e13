//! Remote protocol definitions
//!
//! Typed request and response wrappers around the engine's generic
//! `Message`, used between thin transaction clients and executors.

pub mod messages;
pub mod responses;

pub use messages::{
    AbortRequest, Assumption, CommitInfo, CommitRequest, ExecutorRequest, GroupKeyReply,
    GroupKeyRequest, Operation, PrepareReply, PrepareRequest, ReadReply, ReadRequest,
};
pub use responses::{ErrorKind, ExecutorResponse, ResponseStatus};

use thiserror::Error;

/// Errors when parsing messages
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid error kind: {0}")]
    InvalidErrorKind(String),

    #[error("Invalid body: {0}")]
    Body(#[from] serde_json::Error),
}
