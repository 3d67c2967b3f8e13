//! Error types for record handling

use crossbar_common::CodecError;
use thiserror::Error;

/// Result type for record operations
pub type Result<T> = std::result::Result<T, RecordError>;

/// Errors that can occur while manipulating versioned records
#[derive(Debug, Error)]
pub enum RecordError {
    /// A record or snapshot could not be encoded
    #[error("Serialize error: {0}")]
    Serialize(String),

    /// A stored record, snapshot or group key could not be decoded
    #[error("Deserialize error: {0}")]
    Deserialize(String),

    /// The version chain is shorter than its recorded length
    #[error("Chain truncation failed for key {key}: {reason}")]
    ChainTruncation { key: String, reason: String },

    /// A group key location string is malformed
    #[error("Invalid group key location: {0}")]
    InvalidLocation(String),
}

impl From<CodecError> for RecordError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Encode(msg) => RecordError::Serialize(msg),
            CodecError::Decode(msg) => RecordError::Deserialize(msg),
        }
    }
}
