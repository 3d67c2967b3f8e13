//! Typed response building for executor-to-client communication

use crate::ParseError;
use crossbar_engine::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Error classes that survive the trip over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    KeyNotFound,
    VersionMismatch,
    KeyExists,
    Deserialize,
    ReadFailed,
    DirtyRead,
    Unavailable,
    Other,
}

impl ErrorKind {
    /// Parse from string header value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "key_not_found" => Some(Self::KeyNotFound),
            "version_mismatch" => Some(Self::VersionMismatch),
            "key_exists" => Some(Self::KeyExists),
            "deserialize" => Some(Self::Deserialize),
            "read_failed" => Some(Self::ReadFailed),
            "dirty_read" => Some(Self::DirtyRead),
            "unavailable" => Some(Self::Unavailable),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Convert to string header value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyNotFound => "key_not_found",
            Self::VersionMismatch => "version_mismatch",
            Self::KeyExists => "key_exists",
            Self::Deserialize => "deserialize",
            Self::ReadFailed => "read_failed",
            Self::DirtyRead => "dirty_read",
            Self::Unavailable => "unavailable",
            Self::Other => "other",
        }
    }
}

/// Response status from executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Operation completed; body holds the reply payload
    Ok,
    /// Operation failed
    Error { kind: ErrorKind, message: String },
}

/// Typed executor response
#[derive(Debug, Clone)]
pub struct ExecutorResponse {
    /// Backend the request targeted
    pub backend: String,
    pub status: ResponseStatus,
    /// Serialized reply payload for `Ok`
    pub body: Vec<u8>,
}

impl ExecutorResponse {
    /// Build a successful response carrying `payload`
    pub fn ok<T: Serialize>(backend: impl Into<String>, payload: &T) -> Result<Self, ParseError> {
        Ok(Self {
            backend: backend.into(),
            status: ResponseStatus::Ok,
            body: serde_json::to_vec(payload)?,
        })
    }

    /// Build an error response
    pub fn error(backend: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            status: ResponseStatus::Error {
                kind,
                message: message.into(),
            },
            body: Vec::new(),
        }
    }

    /// Decode the payload of a successful response
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ParseError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Convert to a raw Message for replying
    pub fn into_message(self) -> Message {
        let mut headers = HashMap::new();
        headers.insert("backend".to_string(), self.backend);

        match self.status {
            ResponseStatus::Ok => {
                headers.insert("status".to_string(), "ok".to_string());
            }
            ResponseStatus::Error { kind, message } => {
                headers.insert("status".to_string(), "error".to_string());
                headers.insert("error_kind".to_string(), kind.as_str().to_string());
                headers.insert("error".to_string(), message);
            }
        }

        Message::new(self.body, headers)
    }

    /// Parse from a raw Message
    pub fn from_message(msg: Message) -> Result<Self, ParseError> {
        let backend = msg.header("backend").unwrap_or_default().to_string();

        let status = match msg.header("status") {
            Some("ok") => ResponseStatus::Ok,
            Some("error") => {
                let kind_str = msg
                    .header("error_kind")
                    .ok_or(ParseError::MissingHeader("error_kind"))?;
                let kind = ErrorKind::parse(kind_str)
                    .ok_or_else(|| ParseError::InvalidErrorKind(kind_str.to_string()))?;
                let message = msg
                    .header("error")
                    .unwrap_or("Unknown error")
                    .to_string();
                ResponseStatus::Error { kind, message }
            }
            Some(other) => return Err(ParseError::InvalidStatus(other.to_string())),
            None => return Err(ParseError::MissingHeader("status")),
        };

        Ok(Self {
            backend,
            status,
            body: msg.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PrepareReply;

    #[test]
    fn test_ok_response() {
        let mut reply = PrepareReply::default();
        reply.versions.insert("k".into(), "3".into());
        reply.t_commit = 11;

        let msg = ExecutorResponse::ok("redis", &reply).unwrap().into_message();
        assert_eq!(msg.header("status"), Some("ok"));

        let parsed = ExecutorResponse::from_message(msg).unwrap();
        assert_eq!(parsed.backend, "redis");
        assert_eq!(parsed.payload::<PrepareReply>().unwrap(), reply);
    }

    #[test]
    fn test_error_response() {
        let msg = ExecutorResponse::error("mongo", ErrorKind::VersionMismatch, "stale").into_message();
        let parsed = ExecutorResponse::from_message(msg).unwrap();
        assert_eq!(
            parsed.status,
            ResponseStatus::Error {
                kind: ErrorKind::VersionMismatch,
                message: "stale".into()
            }
        );
    }

    #[test]
    fn test_missing_status() {
        let err = ExecutorResponse::from_message(Message::default()).unwrap_err();
        assert!(matches!(err, ParseError::MissingHeader("status")));
    }
}
