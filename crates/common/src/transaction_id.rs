//! Transaction identifier using UUIDv7
//!
//! Identifiers double as the second half of every GroupKey location, so the
//! textual form is what ends up persisted next to records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Transaction identifier using UUIDv7 for time-ordered uniqueness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a new transaction ID using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID (for testing/deserialization)
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Result<Self, String> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid transaction ID: {}", e))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialOrd for TransactionId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransactionId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TransactionId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..100).map(|_| TransactionId::new()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_from_uuid() {
        let uuid = Uuid::now_v7();
        let txn_id = TransactionId::from_uuid(uuid);
        assert_eq!(txn_id.as_uuid(), &uuid);
    }
}
