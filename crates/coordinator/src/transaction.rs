//! Transaction implementation
//!
//! A transaction owns one datastore engine per backend. Reads and writes are
//! served by the engines; commit runs prepare on every engine in parallel,
//! decides the outcome with a group key, then flips the prepared records.

use crate::config::TransactionConfig;
use crate::error::{Result, TransactionError};
use crossbar_clock::SharedTimeSource;
use crossbar_common::{TransactionId, TxnState};
use crossbar_datastore::{Datastore, GroupKeyMaintainer, TxnContext};
use crossbar_record::{GroupKeyItem, GroupKeyLocation};
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A single-use distributed transaction
pub struct Transaction {
    id: Option<TransactionId>,
    state: TxnState,
    start_time: u64,
    commit_time: u64,
    /// Engines keyed by backend name, iterated in name order
    datastores: BTreeMap<String, Datastore>,
    group_keys: Arc<GroupKeyMaintainer>,
    time_source: SharedTimeSource,
    config: TransactionConfig,
    /// Background state flip; resolves to whether the group key was removed
    cleanup: Option<JoinHandle<bool>>,
    cleaned: bool,
}

impl Transaction {
    pub(crate) fn new(
        datastores: BTreeMap<String, Datastore>,
        group_keys: Arc<GroupKeyMaintainer>,
        time_source: SharedTimeSource,
        config: TransactionConfig,
    ) -> Self {
        Self {
            id: None,
            state: TxnState::Empty,
            start_time: 0,
            commit_time: 0,
            datastores,
            group_keys,
            time_source,
            config,
            cleanup: None,
            cleaned: false,
        }
    }

    /// Transaction ID, assigned by `start`
    pub fn id(&self) -> Option<TransactionId> {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// Final commit time, zero until committed
    pub fn commit_time(&self) -> u64 {
        self.commit_time
    }

    pub fn backends(&self) -> Vec<&str> {
        self.datastores.keys().map(String::as_str).collect()
    }

    fn require(&self, expected: TxnState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(TransactionError::InvalidState(format!(
                "Cannot {} transaction in state {}",
                operation, self.state
            )));
        }
        Ok(())
    }

    fn datastore_mut(&mut self, backend: &str) -> Result<&mut Datastore> {
        self.datastores
            .get_mut(backend)
            .ok_or_else(|| TransactionError::DatastoreNotFound(backend.to_string()))
    }

    /// Assign an ID and start time and bind every engine to this transaction
    pub async fn start(&mut self) -> Result<()> {
        self.require(TxnState::Empty, "start")?;

        let txn_id = TransactionId::new();
        let start_time = self.time_source.now().await?;
        let ctx = Arc::new(TxnContext {
            txn_id,
            start_time,
            config: self.config.record,
            concurrency: self.config.concurrency,
            time_source: self.time_source.clone(),
            group_keys: self.group_keys.clone(),
        });

        for (name, datastore) in self.datastores.iter_mut() {
            datastore
                .start(ctx.clone())
                .await
                .map_err(|e| TransactionError::from_datastore(name, e))?;
        }

        self.id = Some(txn_id);
        self.start_time = start_time;
        self.state = TxnState::Started;
        debug!("Started transaction {} at {}", txn_id, start_time);
        Ok(())
    }

    /// Read and decode the value of `key` on `backend`
    pub async fn read<T: DeserializeOwned>(&mut self, backend: &str, key: &str) -> Result<T> {
        let bytes = self.read_bytes(backend, key).await?;
        Ok(self.config.codec().decode(&bytes)?)
    }

    /// Read the raw value of `key` on `backend`
    pub async fn read_bytes(&mut self, backend: &str, key: &str) -> Result<Vec<u8>> {
        self.require(TxnState::Started, "read in")?;
        self.datastore_mut(backend)?
            .read(key)
            .await
            .map_err(|e| TransactionError::from_datastore(backend, e))
    }

    /// Encode and buffer a write of `value` to `key` on `backend`
    pub fn write<T: Serialize + ?Sized>(&mut self, backend: &str, key: &str, value: &T) -> Result<()> {
        let bytes = self.config.codec().encode(value)?;
        self.write_bytes(backend, key, bytes)
    }

    /// Buffer a write of raw bytes
    pub fn write_bytes(&mut self, backend: &str, key: &str, value: Vec<u8>) -> Result<()> {
        self.require(TxnState::Started, "write in")?;
        self.datastore_mut(backend)?
            .write(key, value)
            .map_err(|e| TransactionError::from_datastore(backend, e))
    }

    /// Buffer a deletion of `key` on `backend`
    pub fn delete(&mut self, backend: &str, key: &str) -> Result<()> {
        self.require(TxnState::Started, "delete in")?;
        self.datastore_mut(backend)?
            .delete(key)
            .map_err(|e| TransactionError::from_datastore(backend, e))
    }

    /// Group key locations: the written backends in name order, capped
    fn group_key_locations(&self, txn_id: &TransactionId) -> Vec<GroupKeyLocation> {
        let limit = self.config.max_group_key_locations.unwrap_or(usize::MAX);
        self.datastores
            .iter()
            .filter(|(_, datastore)| datastore.has_writes())
            .take(limit)
            .map(|(name, _)| GroupKeyLocation::new(name.clone(), txn_id))
            .collect()
    }

    /// Commit this transaction
    pub async fn commit(&mut self) -> Result<()> {
        self.require(TxnState::Started, "commit")?;
        let txn_id = self
            .id
            .ok_or_else(|| TransactionError::InvalidState("Started without an ID".to_string()))?;

        if !self.datastores.values().any(Datastore::needs_prepare) {
            self.commit_time = self.start_time;
            self.state = TxnState::Committed;
            debug!("Committed read-only transaction {}", txn_id);
            return Ok(());
        }

        let locations = self.group_key_locations(&txn_id);
        let group_key_list = GroupKeyLocation::join(&locations);

        // Phase 1: prepare everywhere, first error wins once all have finished
        let proposal = match self.time_source.now().await {
            Ok(now) => now,
            Err(e) => {
                self.discard().await;
                self.state = TxnState::Aborted;
                return Err(e.into());
            }
        };
        let results = join_all(
            self.datastores
                .iter_mut()
                .filter(|(_, datastore)| datastore.needs_prepare())
                .map(|(name, datastore)| {
                    let group_key_list = &group_key_list;
                    async move { (name.clone(), datastore.prepare(group_key_list, proposal).await) }
                }),
        )
        .await;

        let mut t_commit = proposal;
        let mut failure = None;
        for (name, result) in results {
            match result {
                Ok(proposed) => t_commit = t_commit.max(proposed),
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(TransactionError::from_datastore(&name, e));
                    } else {
                        debug!("Prepare on {} for {} also failed: {}", name, txn_id, e);
                    }
                }
            }
        }
        if let Some(error) = failure {
            debug!("Prepare of {} failed: {}", txn_id, error);
            self.abort_prepared(&locations, &group_key_list).await;
            self.state = TxnState::Aborted;
            return Err(error);
        }

        if locations.is_empty() {
            // Nothing written; prepare only validated reads
            self.commit_time = t_commit;
            self.state = TxnState::Committed;
            return Ok(());
        }

        // Decision point: the primary's group key is the outcome
        let decided = match self
            .group_keys
            .create(&locations, GroupKeyItem::committed(t_commit))
            .await
        {
            Ok(outcome) => outcome.item,
            Err(e) => {
                warn!("Could not record commit of {}: {}", txn_id, e);
                match self.abort_prepared(&locations, &group_key_list).await {
                    Some(item) if item.is_committed() => item,
                    _ => {
                        self.state = TxnState::Aborted;
                        return Err(TransactionError::Backend {
                            backend: locations[0].backend.clone(),
                            source: e,
                        });
                    }
                }
            }
        };

        if decided.is_aborted() {
            info!("Transaction {} was aborted before it could commit", txn_id);
            self.rollback_writes(&group_key_list).await;
            self.state = TxnState::Aborted;
            return Err(TransactionError::Aborted(txn_id.to_string()));
        }

        self.commit_time = decided.t_commit;
        self.state = TxnState::Committed;
        debug!("Committed {} at {}", txn_id, decided.t_commit);

        // Phase 2: flip prepared records; readers may race us to it
        let writers: Vec<(String, Datastore)> = std::mem::take(&mut self.datastores)
            .into_iter()
            .filter(|(_, datastore)| datastore.has_writes())
            .collect();
        let flip = flip_records(
            writers,
            self.group_keys.clone(),
            locations,
            decided.t_commit,
            txn_id,
        );
        if self.config.async_commit {
            self.cleanup = Some(tokio::spawn(flip));
        } else {
            self.cleaned = flip.await;
        }
        Ok(())
    }

    /// Abort this transaction, discarding buffered writes
    pub async fn abort(&mut self) -> Result<()> {
        match self.state {
            TxnState::Aborted => return Ok(()),
            TxnState::Committed => {
                return Err(TransactionError::InvalidState(
                    "Cannot abort a committed transaction".to_string(),
                ));
            }
            _ => {}
        }
        self.discard().await;
        self.state = TxnState::Aborted;
        if let Some(txn_id) = self.id {
            debug!("Aborted transaction {}", txn_id);
        }
        Ok(())
    }

    /// Wait for the background state flip.
    ///
    /// Returns `true` when every record was flipped and the group key removed.
    pub async fn wait_for_cleanup(&mut self) -> bool {
        if let Some(handle) = self.cleanup.take() {
            self.cleaned = handle.await.unwrap_or(false);
        }
        self.cleaned
    }

    async fn discard(&mut self) {
        for datastore in self.datastores.values_mut() {
            let _ = datastore.abort(false, "").await;
        }
    }

    /// Record an abort decision and undo prepared writes.
    ///
    /// Returns the decided outcome, `None` when no decision could be recorded.
    /// Records are only rolled back once the abort is decided; otherwise they
    /// stay prepared until their lease runs out.
    async fn abort_prepared(
        &mut self,
        locations: &[GroupKeyLocation],
        group_key_list: &str,
    ) -> Option<GroupKeyItem> {
        let decided = if locations.is_empty() {
            GroupKeyItem::aborted()
        } else {
            match self
                .group_keys
                .create(locations, GroupKeyItem::aborted())
                .await
            {
                Ok(outcome) => outcome.item,
                Err(e) => {
                    warn!(
                        "Could not record abort at {}: {}; leaving records to lease expiry",
                        group_key_list, e
                    );
                    self.discard().await;
                    return None;
                }
            }
        };

        if decided.is_aborted() {
            self.rollback_writes(group_key_list).await;
        }
        Some(decided)
    }

    async fn rollback_writes(&mut self, group_key_list: &str) {
        let results = join_all(self.datastores.iter_mut().map(|(name, datastore)| async move {
            (name.clone(), datastore.abort(true, group_key_list).await)
        }))
        .await;
        for (name, result) in results {
            if let Err(e) = result {
                warn!("Rollback on {} failed: {}", name, e);
            }
        }
    }
}

/// Flip every prepared record, then remove the group key.
///
/// The group key stays when any flip fails for a reason other than a reader
/// having rolled the record forward first, so later readers can still do so.
async fn flip_records(
    writers: Vec<(String, Datastore)>,
    group_keys: Arc<GroupKeyMaintainer>,
    locations: Vec<GroupKeyLocation>,
    t_commit: u64,
    txn_id: TransactionId,
) -> bool {
    let results = join_all(writers.into_iter().map(|(name, mut datastore)| async move {
        let result = datastore.commit(t_commit).await;
        (name, result)
    }))
    .await;

    let mut clean = true;
    for (name, result) in results {
        if let Err(e) = result {
            warn!("State flip on {} for {} failed: {}", name, txn_id, e);
            clean = false;
        }
    }

    if clean {
        group_keys.delete(&locations).await;
    } else {
        debug!("Keeping group key of {} for readers to roll forward", txn_id);
    }
    clean
}
