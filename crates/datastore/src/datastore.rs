//! Per-transaction datastore engine
//!
//! One engine per backend per transaction. Reads go through the visibility
//! processor and land in the read cache; writes and deletes are buffered in
//! the write cache until prepare.

use crate::context::{ConcurrencyLevel, TxnContext};
use crate::error::{DatastoreError, Result};
use crate::remote::RemoteClient;
use crate::visibility::{Resolver, VisibleRead};
use crossbar_common::TxnState;
use crossbar_connector::{ConnectorError, SharedConnector};
use crossbar_protocol::{Assumption, CommitInfo, PrepareRequest};
use crossbar_record::{GroupKeyItem, VersionedRecord};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
enum Backend {
    Local(SharedConnector),
    Remote(Arc<dyn RemoteClient>),
}

/// Datastore engine bound to one backend
pub struct Datastore {
    name: String,
    backend: Backend,
    ctx: Option<Arc<TxnContext>>,
    read_cache: HashMap<String, VersionedRecord>,
    write_cache: HashMap<String, VersionedRecord>,
    invisible: HashSet<String>,
    validations: HashMap<String, Assumption>,
}

impl Datastore {
    /// Create an engine that talks to a backend connector directly
    pub fn local(name: impl Into<String>, connector: SharedConnector) -> Self {
        Self::with_backend(name.into(), Backend::Local(connector))
    }

    /// Create an engine that delegates to remote executors
    pub fn remote(name: impl Into<String>, client: Arc<dyn RemoteClient>) -> Self {
        Self::with_backend(name.into(), Backend::Remote(client))
    }

    fn with_backend(name: String, backend: Backend) -> Self {
        Self {
            name,
            backend,
            ctx: None,
            read_cache: HashMap::new(),
            write_cache: HashMap::new(),
            invisible: HashSet::new(),
            validations: HashMap::new(),
        }
    }

    /// Fresh engine bound to the same backend, with empty caches
    pub fn copy(&self) -> Self {
        Self::with_backend(self.name.clone(), self.backend.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether anything is buffered for prepare
    pub fn has_writes(&self) -> bool {
        !self.write_cache.is_empty()
    }

    /// Whether prepare has anything to do: writes or reads to validate
    pub fn needs_prepare(&self) -> bool {
        self.has_writes() || !self.validations.is_empty()
    }

    /// Bind the engine to a transaction and connect the backend
    pub async fn start(&mut self, ctx: Arc<TxnContext>) -> Result<()> {
        self.clear();
        if let Backend::Local(connector) = &self.backend {
            connector.connect().await?;
        }
        self.ctx = Some(ctx);
        Ok(())
    }

    fn context(&self) -> Result<Arc<TxnContext>> {
        self.ctx
            .clone()
            .ok_or_else(|| DatastoreError::NotStarted(self.name.clone()))
    }

    fn resolver(&self, ctx: &TxnContext, connector: &SharedConnector) -> Resolver {
        Resolver::new(
            connector.clone(),
            ctx.group_keys.clone(),
            ctx.time_source.clone(),
            ctx.config.codec,
        )
    }

    fn cached_value(key: &str, record: &VersionedRecord) -> Result<Vec<u8>> {
        if record.is_deleted {
            return Err(DatastoreError::KeyNotFound(key.to_string()));
        }
        Ok(record.value.clone())
    }

    /// Read the value of `key` visible to this transaction
    pub async fn read(&mut self, key: &str) -> Result<Vec<u8>> {
        let ctx = self.context()?;
        if let Some(record) = self.write_cache.get(key) {
            return Self::cached_value(key, record);
        }
        if let Some(record) = self.read_cache.get(key) {
            return Self::cached_value(key, record);
        }
        if self.invisible.contains(key) {
            return Err(DatastoreError::KeyNotFound(key.to_string()));
        }

        let visible = match &self.backend {
            Backend::Local(connector) => {
                let resolver = self.resolver(&ctx, connector);
                match resolver.fetch(key).await? {
                    Some(record) => {
                        resolver
                            .visible(key, record, ctx.start_time, &ctx.config)
                            .await?
                    }
                    None => VisibleRead::default(),
                }
            }
            Backend::Remote(client) => {
                let reply = client
                    .read(&self.name, key, ctx.start_time, &ctx.config)
                    .await?;
                VisibleRead {
                    record: reply.record,
                    concurrent: reply.concurrent,
                    assumption: reply.assumption,
                }
            }
        };

        if visible.concurrent {
            debug!("{} is held by a concurrent writer, hiding it", key);
            self.invisible.insert(key.to_string());
        }
        if let Some(assumption) = visible.assumption {
            self.validations
                .insert(assumption.group_key_list.clone(), assumption);
        }

        let record = visible
            .record
            .ok_or_else(|| DatastoreError::KeyNotFound(key.to_string()))?;
        let value = Self::cached_value(key, &record);
        // Tombstones are cached too so a later write learns their version
        self.read_cache.insert(key.to_string(), record);
        value
    }

    /// Buffer a write of `value` to `key`
    pub fn write(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.context()?;
        if let Some(record) = self.write_cache.get_mut(key) {
            record.value = value;
            record.is_deleted = false;
            return Ok(());
        }

        let mut record = VersionedRecord::new(key, value);
        if let Some(read) = self.read_cache.get(key) {
            record.version = read.version.clone();
        }
        self.write_cache.insert(key.to_string(), record);
        Ok(())
    }

    /// Buffer a deletion of `key`
    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.context()?;
        if let Some(record) = self.write_cache.get_mut(key) {
            if record.is_deleted {
                return Err(DatastoreError::KeyNotFound(key.to_string()));
            }
            record.is_deleted = true;
            record.value.clear();
            return Ok(());
        }

        let mut record = VersionedRecord::tombstone(key);
        if let Some(read) = self.read_cache.get(key) {
            record.version = read.version.clone();
        }
        self.write_cache.insert(key.to_string(), record);
        Ok(())
    }

    /// Validate speculative reads and conditionally write every buffered
    /// record as prepared. Returns this backend's proposed commit time.
    pub async fn prepare(&mut self, group_key_list: &str, commit_time: u64) -> Result<u64> {
        let ctx = self.context()?;
        if !self.needs_prepare() {
            return Ok(commit_time);
        }

        let mut items: Vec<VersionedRecord> = self.write_cache.values().cloned().collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        for item in &mut items {
            item.group_key_list = group_key_list.to_string();
        }

        let (prepared, proposed) = match &self.backend {
            Backend::Local(connector) => {
                let resolver = self.resolver(&ctx, connector);
                let prepared = self
                    .prepare_local(&ctx, &resolver, items, commit_time)
                    .await?;
                (prepared, commit_time)
            }
            Backend::Remote(client) => {
                self.prepare_remote(&ctx, client.as_ref(), items, group_key_list, commit_time)
                    .await?
            }
        };

        debug!(
            "Prepared {} item(s) of {} on {}, proposing {}",
            prepared.len(),
            ctx.txn_id,
            self.name,
            proposed
        );
        for item in prepared {
            self.write_cache.insert(item.key.clone(), item);
        }
        Ok(proposed)
    }

    async fn prepare_local(
        &self,
        ctx: &TxnContext,
        resolver: &Resolver,
        items: Vec<VersionedRecord>,
        commit_time: u64,
    ) -> Result<Vec<VersionedRecord>> {
        let decided = resolver.validate(&self.validations).await?;

        match ctx.concurrency {
            ConcurrencyLevel::Sequential => {
                let mut prepared = Vec::with_capacity(items.len());
                for item in items {
                    prepared.push(
                        self.prepare_item(ctx, resolver, item, commit_time, &decided)
                            .await?,
                    );
                }
                Ok(prepared)
            }
            ConcurrencyLevel::Parallel => join_all(
                items
                    .into_iter()
                    .map(|item| self.prepare_item(ctx, resolver, item, commit_time, &decided)),
            )
            .await
            .into_iter()
            .collect(),
        }
    }

    async fn prepare_item(
        &self,
        ctx: &TxnContext,
        resolver: &Resolver,
        mut item: VersionedRecord,
        commit_time: u64,
        decided: &HashMap<String, GroupKeyItem>,
    ) -> Result<VersionedRecord> {
        let old = if !item.version.is_empty() {
            self.read_cache.get(&item.key).cloned()
        } else if self.invisible.contains(&item.key) {
            None
        } else {
            resolver
                .discover(&item.key, ctx.start_time, &ctx.config)
                .await?
        };

        let do_create = old.is_none();
        item.update_metadata(
            old.as_ref(),
            commit_time,
            ctx.config.lease_time,
            ctx.config.max_record_length,
            &ctx.config.codec,
        )?;
        resolver.write_prepared(item, do_create, decided).await
    }

    async fn prepare_remote(
        &self,
        ctx: &TxnContext,
        client: &dyn RemoteClient,
        items: Vec<VersionedRecord>,
        group_key_list: &str,
        commit_time: u64,
    ) -> Result<(Vec<VersionedRecord>, u64)> {
        // Read-modify-write items carry their chain; the executor fills in the rest
        let mut items = items
            .into_iter()
            .map(|mut item| {
                if !item.version.is_empty()
                    && let Some(old) = self.read_cache.get(&item.key)
                {
                    item.update_metadata(
                        Some(old),
                        commit_time,
                        ctx.config.lease_time,
                        ctx.config.max_record_length,
                        &ctx.config.codec,
                    )?;
                }
                Ok(item)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut invisible: Vec<String> = items
            .iter()
            .filter(|item| self.invisible.contains(&item.key))
            .map(|item| item.key.clone())
            .collect();
        invisible.sort();

        let reply = client
            .prepare(PrepareRequest {
                backend: self.name.clone(),
                items: items.clone(),
                start_time: ctx.start_time,
                config: ctx.config,
                validations: self.validations.clone(),
                group_key_list: group_key_list.to_string(),
                invisible,
                concurrency: ctx.concurrency,
            })
            .await?;

        for item in &mut items {
            if let Some(version) = reply.versions.get(&item.key) {
                item.version = version.clone();
            }
            item.txn_state = TxnState::Prepared;
            item.t_valid = reply.t_commit;
        }
        Ok((items, reply.t_commit))
    }

    /// Flip every prepared record to committed at `t_commit`.
    ///
    /// A version mismatch means a reader already rolled the record forward.
    pub async fn commit(&mut self, t_commit: u64) -> Result<()> {
        let items: Vec<VersionedRecord> = self.write_cache.drain().map(|(_, v)| v).collect();
        let result = match &self.backend {
            Backend::Local(connector) => {
                let results = join_all(
                    items
                        .into_iter()
                        .map(|item| commit_record(connector, item, t_commit)),
                )
                .await;
                results.into_iter().collect::<Result<Vec<_>>>().map(|_| ())
            }
            Backend::Remote(client) => {
                let infos = items
                    .into_iter()
                    .map(|item| CommitInfo {
                        key: item.key,
                        version: item.version,
                    })
                    .collect();
                client.commit(&self.name, infos, t_commit).await
            }
        };
        self.clear();
        result
    }

    /// Discard buffered state, rolling back prepared records still owned by
    /// this transaction when `prepared` is set.
    pub async fn abort(&mut self, prepared: bool, group_key_list: &str) -> Result<()> {
        if !prepared || self.write_cache.is_empty() {
            self.clear();
            return Ok(());
        }
        let ctx = self.context()?;
        let mut keys: Vec<String> = self.write_cache.keys().cloned().collect();
        keys.sort();

        let result = match &self.backend {
            Backend::Local(connector) => {
                let resolver = self.resolver(&ctx, connector);
                let results = join_all(
                    keys.iter()
                        .map(|key| resolver.rollback_owned(key, group_key_list)),
                )
                .await;
                let mut first_error = None;
                for (key, result) in keys.iter().zip(results) {
                    if let Err(e) = result {
                        warn!("Failed to roll back {} on {}: {}", key, self.name, e);
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
            Backend::Remote(client) => {
                client
                    .abort(&self.name, keys, group_key_list, ctx.config.codec)
                    .await
            }
        };
        self.clear();
        result
    }

    fn clear(&mut self) {
        self.read_cache.clear();
        self.write_cache.clear();
        self.invisible.clear();
        self.validations.clear();
    }
}

async fn commit_record(
    connector: &SharedConnector,
    mut item: VersionedRecord,
    t_commit: u64,
) -> Result<()> {
    item.txn_state = TxnState::Committed;
    item.t_valid = t_commit;
    match connector.conditional_update(&item.key, &item, false).await {
        Ok(_) => Ok(()),
        Err(ConnectorError::VersionMismatch { key, .. }) => {
            debug!("{} was already resolved by a reader", key);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
