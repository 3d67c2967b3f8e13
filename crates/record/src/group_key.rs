//! Group key outcome records and their locations

use crate::error::{RecordError, Result};
use crossbar_common::{TransactionId, TxnState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome record of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKeyItem {
    pub txn_state: TxnState,
    pub t_commit: u64,
}

impl GroupKeyItem {
    pub fn committed(t_commit: u64) -> Self {
        Self {
            txn_state: TxnState::Committed,
            t_commit,
        }
    }

    pub fn aborted() -> Self {
        Self {
            txn_state: TxnState::Aborted,
            t_commit: 0,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.txn_state == TxnState::Committed
    }

    pub fn is_aborted(&self) -> bool {
        self.txn_state == TxnState::Aborted
    }

    /// Encode as the string stored at a location
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RecordError::Serialize(e.to_string()))
    }

    /// Decode the string stored at a location
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| RecordError::Deserialize(e.to_string()))
    }
}

/// One place a group key is stored: `backend:txn_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKeyLocation {
    pub backend: String,
    pub txn_id: String,
}

impl GroupKeyLocation {
    pub fn new(backend: impl Into<String>, txn_id: &TransactionId) -> Self {
        Self {
            backend: backend.into(),
            txn_id: txn_id.to_string(),
        }
    }

    /// Parse a single `backend:txn_id` location
    pub fn parse(s: &str) -> Result<Self> {
        match s.rsplit_once(':') {
            Some((backend, txn_id)) if !backend.is_empty() && !txn_id.is_empty() => Ok(Self {
                backend: backend.to_string(),
                txn_id: txn_id.to_string(),
            }),
            _ => Err(RecordError::InvalidLocation(s.to_string())),
        }
    }

    /// Parse a comma-joined location list; the empty string yields no locations
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Join locations into the comma-separated form stored on records
    pub fn join(locations: &[Self]) -> String {
        locations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Name under which the outcome is stored at this backend
    pub fn storage_key(&self) -> &str {
        &self.txn_id
    }
}

impl fmt::Display for GroupKeyLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.txn_id)
    }
}
