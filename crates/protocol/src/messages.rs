//! Typed request wrappers for client-to-executor communication
//!
//! Executors keep no session state, so every request spells out the backend,
//! the reader's start time and the record configuration it runs under.

use crate::ParseError;
use crossbar_common::Codec;
use crossbar_engine::Message;
use crossbar_record::{
    ConcurrencyLevel, GroupKeyItem, GroupKeyLocation, ReadStrategy, RecordConfig, VersionedRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Operations an executor serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Prepare,
    Commit,
    Abort,
    GroupKeyCreate,
    GroupKeyRead,
    GroupKeyDelete,
}

impl Operation {
    /// Parse from string header value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "prepare" => Some(Self::Prepare),
            "commit" => Some(Self::Commit),
            "abort" => Some(Self::Abort),
            "group_key_create" => Some(Self::GroupKeyCreate),
            "group_key_read" => Some(Self::GroupKeyRead),
            "group_key_delete" => Some(Self::GroupKeyDelete),
            _ => None,
        }
    }

    /// Convert to string header value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Prepare => "prepare",
            Self::Commit => "commit",
            Self::Abort => "abort",
            Self::GroupKeyCreate => "group_key_create",
            Self::GroupKeyRead => "group_key_read",
            Self::GroupKeyDelete => "group_key_delete",
        }
    }
}

/// Speculative read that must be confirmed before commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assumption {
    /// Key that was read speculatively
    pub key: String,
    /// `AssumeCommit` or `AssumeAbort`
    pub strategy: ReadStrategy,
    /// Group key reference of the transaction whose outcome was assumed
    pub group_key_list: String,
    /// Lease of the speculatively read record
    pub t_lease: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub backend: String,
    pub key: String,
    pub start_time: u64,
    pub config: RecordConfig,
}

/// Result of a visibility-processed read
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadReply {
    /// Visible version, `None` when nothing is visible
    pub record: Option<VersionedRecord>,
    /// Strategy that produced the record; `Pessimistic` unless the read was speculative
    pub strategy: ReadStrategy,
    /// Group key reference of the head record that was examined
    pub group_key_list: String,
    /// The head belongs to a live concurrent writer; the key must stay hidden
    pub concurrent: bool,
    /// Present when the read was speculative
    pub assumption: Option<Assumption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub backend: String,
    /// Records to write; a non-empty version marks a read-modify-write
    pub items: Vec<VersionedRecord>,
    pub start_time: u64,
    pub config: RecordConfig,
    /// Speculative reads to validate, keyed by group key reference
    pub validations: HashMap<String, Assumption>,
    /// Group key reference stamped on every prepared record
    pub group_key_list: String,
    /// Keys the client saw held by a concurrent writer; these can only be created
    #[serde(default)]
    pub invisible: Vec<String>,
    /// Whether the executor may update items concurrently
    #[serde(default)]
    pub concurrency: ConcurrencyLevel,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrepareReply {
    /// New CAS version per key
    pub versions: HashMap<String, String>,
    /// Commit time proposed by the executor
    pub t_commit: u64,
}

/// A prepared key and the version it was prepared at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub key: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub backend: String,
    pub items: Vec<CommitInfo>,
    pub t_commit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortRequest {
    pub backend: String,
    pub keys: Vec<String>,
    pub group_key_list: String,
    /// Codec needed to restore previous versions
    pub codec: Codec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupKeyRequest {
    pub location: GroupKeyLocation,
    /// Value to create; only set for creates
    pub item: Option<GroupKeyItem>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupKeyReply {
    pub item: Option<GroupKeyItem>,
}

/// Typed wrapper around Message for client-to-executor requests
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorRequest {
    Read(ReadRequest),
    Prepare(PrepareRequest),
    Commit(CommitRequest),
    Abort(AbortRequest),
    GroupKeyCreate(GroupKeyRequest),
    GroupKeyRead(GroupKeyRequest),
    GroupKeyDelete(GroupKeyRequest),
}

impl ExecutorRequest {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Read(_) => Operation::Read,
            Self::Prepare(_) => Operation::Prepare,
            Self::Commit(_) => Operation::Commit,
            Self::Abort(_) => Operation::Abort,
            Self::GroupKeyCreate(_) => Operation::GroupKeyCreate,
            Self::GroupKeyRead(_) => Operation::GroupKeyRead,
            Self::GroupKeyDelete(_) => Operation::GroupKeyDelete,
        }
    }

    /// Parse a Message into a typed request
    pub fn from_message(msg: Message) -> Result<Self, ParseError> {
        let op_str = msg.header("op").ok_or(ParseError::MissingHeader("op"))?;
        let op =
            Operation::parse(op_str).ok_or_else(|| ParseError::InvalidOperation(op_str.to_string()))?;

        let body = &msg.body;
        Ok(match op {
            Operation::Read => Self::Read(serde_json::from_slice(body)?),
            Operation::Prepare => Self::Prepare(serde_json::from_slice(body)?),
            Operation::Commit => Self::Commit(serde_json::from_slice(body)?),
            Operation::Abort => Self::Abort(serde_json::from_slice(body)?),
            Operation::GroupKeyCreate => Self::GroupKeyCreate(serde_json::from_slice(body)?),
            Operation::GroupKeyRead => Self::GroupKeyRead(serde_json::from_slice(body)?),
            Operation::GroupKeyDelete => Self::GroupKeyDelete(serde_json::from_slice(body)?),
        })
    }

    /// Convert to a raw Message for sending
    pub fn into_message(self) -> Result<Message, ParseError> {
        let op = self.operation();
        let body = match &self {
            Self::Read(req) => serde_json::to_vec(req)?,
            Self::Prepare(req) => serde_json::to_vec(req)?,
            Self::Commit(req) => serde_json::to_vec(req)?,
            Self::Abort(req) => serde_json::to_vec(req)?,
            Self::GroupKeyCreate(req) | Self::GroupKeyRead(req) | Self::GroupKeyDelete(req) => {
                serde_json::to_vec(req)?
            }
        };
        let mut headers = HashMap::new();
        headers.insert("op".to_string(), op.as_str().to_string());
        Ok(Message::new(body, headers))
    }
}
