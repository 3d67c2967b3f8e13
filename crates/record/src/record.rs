//! Versioned record and its bounded version chain
//!
//! A record's history lives inside the record itself: `prev` holds a fully
//! encoded snapshot of the preceding record, which in turn holds its own
//! `prev`. Walking the chain decodes one owned snapshot per hop.

use crate::error::{RecordError, Result};
use crate::group_key::GroupKeyLocation;
use crossbar_common::{Codec, TxnState};
use serde::{Deserialize, Serialize};

/// One key's current version plus its encoded history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub key: String,
    /// Opaque encoded payload
    pub value: Vec<u8>,
    /// Comma-joined group key locations of the writing transaction
    pub group_key_list: String,
    pub txn_state: TxnState,
    /// Time from which this version is visible
    pub t_valid: u64,
    /// Deadline after which an unresolved prepared version is presumed abandoned
    pub t_lease: u64,
    /// Encoded previous record, empty when there is none
    pub prev: Vec<u8>,
    pub linked_len: usize,
    pub is_deleted: bool,
    /// Backend CAS token, empty when unknown
    pub version: String,
}

impl VersionedRecord {
    /// Create a new record holding `value`
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            group_key_list: String::new(),
            txn_state: TxnState::Committed,
            t_valid: 0,
            t_lease: 0,
            prev: Vec::new(),
            linked_len: 1,
            is_deleted: false,
            version: String::new(),
        }
    }

    /// Create a deletion marker for `key`
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            is_deleted: true,
            ..Self::new(key, Vec::new())
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.txn_state == TxnState::Prepared
    }

    pub fn is_committed(&self) -> bool {
        self.txn_state == TxnState::Committed
    }

    pub fn has_prev(&self) -> bool {
        !self.prev.is_empty()
    }

    /// Whether this record was written by the transaction owning `group_key_list`
    pub fn belongs_to(&self, group_key_list: &str) -> bool {
        !group_key_list.is_empty() && self.group_key_list == group_key_list
    }

    /// Parse this record's group key locations
    pub fn group_key_locations(&self) -> Result<Vec<GroupKeyLocation>> {
        GroupKeyLocation::parse_list(&self.group_key_list)
    }

    /// Decode the previous record, if any
    pub fn prev_record(&self, codec: &Codec) -> Result<Option<VersionedRecord>> {
        if self.prev.is_empty() {
            return Ok(None);
        }
        Ok(Some(codec.decode(&self.prev)?))
    }

    /// Cut the chain down to `max_len` versions.
    ///
    /// The oldest kept version loses its `prev` and restarts the count at 1;
    /// every newer kept version is re-encoded on top of it.
    pub fn truncate(self, max_len: usize, codec: &Codec) -> Result<VersionedRecord> {
        let max_len = max_len.max(1);
        if self.linked_len <= max_len {
            return Ok(self);
        }

        let mut stack = Vec::with_capacity(max_len);
        let mut current = self;
        for _ in 1..max_len {
            let prev = current
                .prev_record(codec)?
                .ok_or_else(|| RecordError::ChainTruncation {
                    key: current.key.clone(),
                    reason: format!(
                        "chain ends after {} of {} versions",
                        stack.len() + 1,
                        current.linked_len
                    ),
                })?;
            stack.push(current);
            current = prev;
        }

        let mut target = current;
        target.prev.clear();
        target.linked_len = 1;
        while let Some(mut item) = stack.pop() {
            item.prev = codec.encode(&target)?;
            item.linked_len = target.linked_len + 1;
            target = item;
        }
        Ok(target)
    }

    /// Stamp this record as a prepared successor of `old`.
    ///
    /// `old` becomes the head of the chain behind this record and donates its
    /// CAS version, so the conditional update only lands on the exact version
    /// that was read.
    pub fn update_metadata(
        &mut self,
        old: Option<&VersionedRecord>,
        commit_time: u64,
        lease_time: u64,
        max_len: usize,
        codec: &Codec,
    ) -> Result<()> {
        match old {
            None => {
                self.prev.clear();
                self.linked_len = 1;
            }
            Some(old) => {
                self.prev = codec.encode(old)?;
                self.linked_len = old.linked_len + 1;
                self.version = old.version.clone();
            }
        }

        let mut truncated = std::mem::replace(self, Self::new(String::new(), Vec::new()))
            .truncate(max_len, codec)?;
        truncated.txn_state = TxnState::Prepared;
        truncated.t_valid = commit_time;
        truncated.t_lease = commit_time.saturating_add(lease_time);
        *self = truncated;
        Ok(())
    }

    /// Find the newest version visible to a reader that started at `start_time`.
    ///
    /// Walks at most `max_len` versions. Returns `None` when no version in
    /// range is older than `start_time`. A returned tombstone means the key
    /// was deleted as of that snapshot.
    pub fn snapshot_at(
        &self,
        start_time: u64,
        max_len: usize,
        codec: &Codec,
    ) -> Result<Option<VersionedRecord>> {
        let max_len = max_len.max(1);
        let mut current = self.clone();
        for hop in 1..=max_len {
            if current.t_valid < start_time {
                return Ok(Some(current));
            }
            if hop == max_len {
                break;
            }
            match current.prev_record(codec)? {
                Some(prev) => current = prev,
                None => break,
            }
        }
        Ok(None)
    }

    /// Number of versions actually reachable from this record
    pub fn chain_depth(&self, codec: &Codec) -> Result<usize> {
        let mut depth = 1;
        let mut current = self.prev_record(codec)?;
        while let Some(record) = current {
            depth += 1;
            current = record.prev_record(codec)?;
        }
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODEC: Codec = Codec::Json;

    fn committed(key: &str, value: &str, t_valid: u64) -> VersionedRecord {
        let mut record = VersionedRecord::new(key, value.as_bytes().to_vec());
        record.t_valid = t_valid;
        record
    }

    /// Build a chain the way sequential commits would, one version per time.
    fn build_chain(times: &[u64], max_len: usize) -> VersionedRecord {
        let mut head: Option<VersionedRecord> = None;
        for (i, t) in times.iter().enumerate() {
            let mut next = VersionedRecord::new("k", format!("v{}", i + 1).into_bytes());
            next.update_metadata(head.as_ref(), *t, 100, max_len, &CODEC)
                .unwrap();
            next.txn_state = TxnState::Committed;
            next.version = (i + 1).to_string();
            head = Some(next);
        }
        head.unwrap()
    }

    #[test]
    fn test_update_metadata_first_version() {
        let mut record = VersionedRecord::new("k", b"v".to_vec());
        record.update_metadata(None, 10, 5, 2, &CODEC).unwrap();
        assert_eq!(record.linked_len, 1);
        assert!(!record.has_prev());
        assert_eq!(record.txn_state, TxnState::Prepared);
        assert_eq!(record.t_valid, 10);
        assert_eq!(record.t_lease, 15);
        assert!(record.version.is_empty());
    }

    #[test]
    fn test_update_metadata_links_previous() {
        let mut old = committed("k", "old", 5);
        old.version = "7".into();
        let mut record = VersionedRecord::new("k", b"new".to_vec());
        record.update_metadata(Some(&old), 10, 5, 3, &CODEC).unwrap();

        assert_eq!(record.linked_len, 2);
        assert_eq!(record.version, "7");
        assert_eq!(record.prev_record(&CODEC).unwrap().unwrap(), old);
    }

    #[test]
    fn test_chain_bound() {
        for n in 1..=6 {
            let times: Vec<u64> = (1..=n).map(|t| t * 10).collect();
            let head = build_chain(&times, 3);
            let expected = (n as usize).min(3);
            assert_eq!(head.linked_len, expected);
            assert_eq!(head.chain_depth(&CODEC).unwrap(), expected);

            let mut oldest = head.clone();
            while let Some(prev) = oldest.prev_record(&CODEC).unwrap() {
                oldest = prev;
            }
            assert!(!oldest.has_prev());
            assert_eq!(oldest.linked_len, 1);
        }
    }

    #[test]
    fn test_truncate_keeps_newest_versions() {
        let head = build_chain(&[10, 20, 30, 40], 2);
        assert_eq!(head.value, b"v4");
        let prev = head.prev_record(&CODEC).unwrap().unwrap();
        assert_eq!(prev.value, b"v3");
        assert!(!prev.has_prev());
    }

    #[test]
    fn test_truncate_broken_chain() {
        let mut record = committed("k", "v", 1);
        record.linked_len = 5;
        let err = record.truncate(3, &CODEC).unwrap_err();
        assert!(matches!(err, RecordError::ChainTruncation { .. }));
    }

    #[test]
    fn test_snapshot_visibility() {
        let head = build_chain(&[10, 20, 30], 3);

        let at = |start| {
            head.snapshot_at(start, 3, &CODEC)
                .unwrap()
                .map(|r| String::from_utf8(r.value).unwrap())
        };

        assert_eq!(at(5), None);
        assert_eq!(at(10), None);
        assert_eq!(at(11).as_deref(), Some("v1"));
        assert_eq!(at(20), Some("v1".to_string()));
        assert_eq!(at(25).as_deref(), Some("v2"));
        assert_eq!(at(31).as_deref(), Some("v3"));
    }

    #[test]
    fn test_snapshot_bounded_by_max_len() {
        let head = build_chain(&[10, 20, 30], 3);
        // Only two hops allowed: v3 and v2 are inspected, v1 is out of range.
        assert_eq!(head.snapshot_at(15, 2, &CODEC).unwrap(), None);
    }

    #[test]
    fn test_belongs_to() {
        let mut record = committed("k", "v", 1);
        record.group_key_list = "a:1".into();
        assert!(record.belongs_to("a:1"));
        assert!(!record.belongs_to("a:2"));
        assert!(!VersionedRecord::new("k", vec![]).belongs_to(""));
    }

    #[test]
    fn test_bincode_chain() {
        let codec = Codec::Bincode;
        let mut first = committed("k", "a", 1);
        first.version = "1".into();
        let mut second = VersionedRecord::new("k", b"b".to_vec());
        second.update_metadata(Some(&first), 2, 1, 2, &codec).unwrap();
        assert_eq!(second.prev_record(&codec).unwrap().unwrap().value, b"a");
    }
}
