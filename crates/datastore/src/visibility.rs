//! Visibility processing for versioned records
//!
//! Given the raw record stored for a key, decide which version a reader may
//! see: resolve prepared records through their group key (roll forward or
//! roll back), abort owners whose lease ran out, hide concurrent writers, and
//! finally walk the chain to the reader's snapshot. Shared by the local
//! datastore engine and the stateless executor.

use crate::error::{DatastoreError, Result};
use crate::group_key::GroupKeyMaintainer;
use crossbar_clock::SharedTimeSource;
use crossbar_common::{Codec, TxnState};
use crossbar_connector::{ConnectorError, SharedConnector};
use crossbar_protocol::Assumption;
use crossbar_record::{GroupKeyItem, GroupKeyLocation, ReadStrategy, RecordConfig, VersionedRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Attempts at resolving a record that keeps losing CAS races
const RESOLVE_ATTEMPTS: usize = 3;

/// How a stored record was resolved for a reader
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The record is committed, possibly after a roll forward or rollback
    Resolved(VersionedRecord),
    /// A live concurrent writer owns the record; carries its previous version
    Concurrent(Option<VersionedRecord>),
    /// Accepted on an assumption that must hold at commit time
    Assumed {
        record: Option<VersionedRecord>,
        assumption: Assumption,
    },
}

/// Outcome of a visibility-processed read
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisibleRead {
    /// Version in the reader's snapshot, possibly a tombstone
    pub record: Option<VersionedRecord>,
    /// The key must stay hidden for the rest of the transaction
    pub concurrent: bool,
    pub assumption: Option<Assumption>,
}

/// Resolves records of one backend
#[derive(Clone)]
pub struct Resolver {
    connector: SharedConnector,
    group_keys: Arc<GroupKeyMaintainer>,
    time_source: SharedTimeSource,
    codec: Codec,
}

impl Resolver {
    pub fn new(
        connector: SharedConnector,
        group_keys: Arc<GroupKeyMaintainer>,
        time_source: SharedTimeSource,
        codec: Codec,
    ) -> Self {
        Self {
            connector,
            group_keys,
            time_source,
            codec,
        }
    }

    pub fn connector(&self) -> &SharedConnector {
        &self.connector
    }

    pub fn group_keys(&self) -> &Arc<GroupKeyMaintainer> {
        &self.group_keys
    }

    /// Fetch the stored record, `None` when the key was never written
    pub async fn fetch(&self, key: &str) -> Result<Option<VersionedRecord>> {
        match self.connector.get_item(key).await {
            Ok(record) => Ok(Some(record)),
            Err(ConnectorError::KeyNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve `record`, re-fetching and retrying when a roll forward or
    /// rollback loses its CAS to another resolver.
    pub async fn resolve(
        &self,
        key: &str,
        mut record: VersionedRecord,
        start_time: u64,
        config: &RecordConfig,
    ) -> Result<Resolution> {
        for attempt in 1..=RESOLVE_ATTEMPTS {
            match self.resolve_once(key, record, start_time, config).await {
                Err(e) if e.is_conflict() && attempt < RESOLVE_ATTEMPTS => {
                    debug!("Lost resolution race on {} (attempt {}), re-reading", key, attempt);
                    record = self
                        .fetch(key)
                        .await?
                        .ok_or_else(|| DatastoreError::KeyNotFound(key.to_string()))?;
                }
                other => return other,
            }
        }
        Err(DatastoreError::VersionMismatch(key.to_string()))
    }

    async fn resolve_once(
        &self,
        key: &str,
        record: VersionedRecord,
        start_time: u64,
        config: &RecordConfig,
    ) -> Result<Resolution> {
        if record.is_committed() {
            return Ok(Resolution::Resolved(record));
        }

        let locations = record.group_key_locations()?;
        if let Some(outcome) = self.group_keys.read(&locations).await? {
            return self
                .apply_outcome(key, record, outcome)
                .await
                .map(Resolution::Resolved);
        }

        let now = self.time_source.now().await?;
        if record.t_lease < now {
            debug!(
                "Lease on {} expired at {} (now {}), aborting owner",
                key, record.t_lease, now
            );
            let outcome = if locations.is_empty() {
                GroupKeyItem::aborted()
            } else {
                self.group_keys
                    .create(&locations, GroupKeyItem::aborted())
                    .await?
                    .item
            };
            return self
                .apply_outcome(key, record, outcome)
                .await
                .map(Resolution::Resolved);
        }

        if start_time < record.t_valid {
            return Ok(Resolution::Concurrent(record.prev_record(&self.codec)?));
        }

        let assumption = Assumption {
            key: key.to_string(),
            strategy: config.read_strategy,
            group_key_list: record.group_key_list.clone(),
            t_lease: record.t_lease,
        };
        match config.read_strategy {
            ReadStrategy::Pessimistic => Err(DatastoreError::ReadFailed(key.to_string())),
            ReadStrategy::AssumeCommit => Ok(Resolution::Assumed {
                record: Some(record),
                assumption,
            }),
            ReadStrategy::AssumeAbort => Ok(Resolution::Assumed {
                record: record.prev_record(&self.codec)?,
                assumption,
            }),
        }
    }

    async fn apply_outcome(
        &self,
        key: &str,
        record: VersionedRecord,
        outcome: GroupKeyItem,
    ) -> Result<VersionedRecord> {
        if outcome.is_committed() {
            self.roll_forward(key, record, outcome.t_commit).await
        } else {
            self.rollback(key, record).await
        }
    }

    /// Resolve and walk to the reader's snapshot
    pub async fn visible(
        &self,
        key: &str,
        record: VersionedRecord,
        start_time: u64,
        config: &RecordConfig,
    ) -> Result<VisibleRead> {
        let (candidate, concurrent, assumption) =
            match self.resolve(key, record, start_time, config).await? {
                Resolution::Resolved(record) => (Some(record), false, None),
                Resolution::Concurrent(prev) => (prev, true, None),
                Resolution::Assumed { record, assumption } => (record, false, Some(assumption)),
            };

        let record = match candidate {
            Some(candidate) => {
                candidate.snapshot_at(start_time, config.max_record_length, &self.codec)?
            }
            None => None,
        };
        Ok(VisibleRead {
            record,
            concurrent,
            assumption,
        })
    }

    /// Fetch and resolve `key` for a blind write.
    ///
    /// Unresolvable records are refused rather than assumed, and a concurrent
    /// writer shows up as "nothing visible" so the create conflicts.
    pub async fn discover(
        &self,
        key: &str,
        start_time: u64,
        config: &RecordConfig,
    ) -> Result<Option<VersionedRecord>> {
        let Some(record) = self.fetch(key).await? else {
            return Ok(None);
        };
        let strict = config.with_read_strategy(ReadStrategy::Pessimistic);
        match self.resolve(key, record, start_time, &strict).await? {
            Resolution::Resolved(record) => {
                Ok(record.snapshot_at(start_time, config.max_record_length, &self.codec)?)
            }
            Resolution::Concurrent(_) => Ok(None),
            Resolution::Assumed { .. } => Err(DatastoreError::ReadFailed(key.to_string())),
        }
    }

    /// Mark a prepared record committed in place
    pub async fn roll_forward(
        &self,
        key: &str,
        mut record: VersionedRecord,
        t_commit: u64,
    ) -> Result<VersionedRecord> {
        record.txn_state = TxnState::Committed;
        if t_commit > 0 {
            record.t_valid = t_commit;
        }
        record.version = self
            .connector
            .conditional_update(key, &record, false)
            .await?;
        debug!("Rolled {} forward to t_valid {}", key, record.t_valid);
        Ok(record)
    }

    /// Restore a prepared record's previous version, or tombstone it
    pub async fn rollback(&self, key: &str, record: VersionedRecord) -> Result<VersionedRecord> {
        let mut restored = match record.prev_record(&self.codec)? {
            Some(prev) => prev,
            None => {
                let mut tombstone = record.clone();
                tombstone.is_deleted = true;
                tombstone.value.clear();
                tombstone.txn_state = TxnState::Committed;
                tombstone
            }
        };
        restored.version = record.version;
        restored.version = self
            .connector
            .conditional_update(key, &restored, false)
            .await?;
        debug!(
            "Rolled {} back{}",
            key,
            if restored.is_deleted { " to tombstone" } else { "" }
        );
        Ok(restored)
    }

    /// Roll back `key` only if it is still a prepared record of `group_key_list`.
    ///
    /// Losing the CAS means someone else already resolved the record.
    pub async fn rollback_owned(&self, key: &str, group_key_list: &str) -> Result<()> {
        let Some(record) = self.fetch(key).await? else {
            return Ok(());
        };
        if !record.belongs_to(group_key_list) || !record.is_prepared() {
            return Ok(());
        }
        match self.rollback(key, record).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => {
                debug!("Rollback of {} raced with another resolver", key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Check speculative reads against their owners' outcomes.
    ///
    /// Returns the decided outcome per group key reference. An `AssumeAbort`
    /// read of an owner whose lease has run out forces the abort itself.
    pub async fn validate(
        &self,
        validations: &HashMap<String, Assumption>,
    ) -> Result<HashMap<String, GroupKeyItem>> {
        let mut decided = HashMap::with_capacity(validations.len());
        for (group_key_list, assumption) in validations {
            let locations = GroupKeyLocation::parse_list(group_key_list)?;
            let outcome = match self.group_keys.read(&locations).await? {
                Some(outcome) => outcome,
                None => self.force_outcome(&locations, assumption).await?,
            };

            let holds = match assumption.strategy {
                ReadStrategy::AssumeCommit => outcome.is_committed(),
                ReadStrategy::AssumeAbort => outcome.is_aborted(),
                ReadStrategy::Pessimistic => true,
            };
            if !holds {
                return Err(DatastoreError::DirtyRead(format!(
                    "{} was read as {} but its writer {}",
                    assumption.key, assumption.strategy, outcome.txn_state
                )));
            }
            decided.insert(group_key_list.clone(), outcome);
        }
        Ok(decided)
    }

    async fn force_outcome(
        &self,
        locations: &[GroupKeyLocation],
        assumption: &Assumption,
    ) -> Result<GroupKeyItem> {
        let lease_expired = assumption.t_lease < self.time_source.now().await?;
        if assumption.strategy != ReadStrategy::AssumeAbort || !lease_expired {
            return Err(DatastoreError::DirtyRead(format!(
                "outcome of the writer of {} is still unknown",
                assumption.key
            )));
        }

        let outcome = self
            .group_keys
            .create(locations, GroupKeyItem::aborted())
            .await?
            .item;
        if outcome.is_aborted() {
            self.rollback_owned(&assumption.key, &assumption.group_key_list)
                .await?;
        }
        Ok(outcome)
    }

    /// Replace a prepared `prev` snapshot whose writer is known to have
    /// committed with its committed form.
    pub fn settle_prev(
        &self,
        item: &mut VersionedRecord,
        decided: &HashMap<String, GroupKeyItem>,
    ) -> Result<()> {
        if let Some(mut prev) = item.prev_record(&self.codec)?
            && prev.is_prepared()
            && let Some(outcome) = decided.get(&prev.group_key_list)
            && outcome.is_committed()
        {
            prev.txn_state = TxnState::Committed;
            prev.t_valid = outcome.t_commit;
            item.prev = self.codec.encode(&prev).map_err(crossbar_record::RecordError::from)?;
        }
        Ok(())
    }

    /// Settle, then conditionally write a prepared record
    pub async fn write_prepared(
        &self,
        mut item: VersionedRecord,
        do_create: bool,
        decided: &HashMap<String, GroupKeyItem>,
    ) -> Result<VersionedRecord> {
        self.settle_prev(&mut item, decided)?;
        let key = item.key.clone();
        item.version = self
            .connector
            .conditional_update(&key, &item, do_create)
            .await?;
        Ok(item)
    }
}
