//! Stateless executor
//!
//! Serves the remote protocol for the backends it has connectors for. Each
//! request carries everything needed to run it: the backend, the reader's
//! start time and the record configuration. Visibility processing is the
//! same resolver the local datastore engine uses.

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::store::RoutedGroupKeyStore;
use crossbar_clock::SharedTimeSource;
use crossbar_common::{Codec, TxnState};
use crossbar_connector::{ConnectorError, SharedConnector};
use crossbar_datastore::{
    ConnectorGroupKeyStore, DatastoreError, GroupKeyMaintainer, GroupKeyStore, Resolver,
};
use crossbar_engine::Message;
use crossbar_protocol::{
    AbortRequest, CommitRequest, ErrorKind, ExecutorRequest, ExecutorResponse, GroupKeyReply,
    GroupKeyRequest, PrepareReply, PrepareRequest, ReadReply, ReadRequest,
};
use crossbar_record::{
    ConcurrencyLevel, GroupKeyItem, GroupKeyLocation, ReadStrategy, VersionedRecord,
};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executor serving one or more backends
pub struct Executor {
    connectors: HashMap<String, SharedConnector>,
    /// Group keys at locations this executor owns
    local_store: ConnectorGroupKeyStore,
    /// Group keys anywhere, for visibility processing
    group_keys: Arc<GroupKeyMaintainer>,
    time_source: SharedTimeSource,
}

impl Executor {
    /// Create an executor over `connectors`.
    ///
    /// `peers` reaches group key locations on backends served elsewhere.
    pub fn new(
        connectors: HashMap<String, SharedConnector>,
        time_source: SharedTimeSource,
        config: ExecutorConfig,
        peers: Option<Arc<dyn GroupKeyStore>>,
    ) -> Self {
        let routed = RoutedGroupKeyStore::new(connectors.clone(), peers);
        let group_keys =
            Arc::new(GroupKeyMaintainer::new(Arc::new(routed)).with_cache(config.group_key_cache));
        Self {
            local_store: ConnectorGroupKeyStore::new(connectors.clone()),
            connectors,
            group_keys,
            time_source,
        }
    }

    /// Connect every backend
    pub async fn connect(&self) -> Result<()> {
        for (name, connector) in &self.connectors {
            connector.connect().await.map_err(DatastoreError::from)?;
            debug!("Executor connected to {}", name);
        }
        Ok(())
    }

    /// Backends served here, sorted
    pub fn backends(&self) -> Vec<String> {
        let mut backends: Vec<String> = self.connectors.keys().cloned().collect();
        backends.sort();
        backends
    }

    /// Group key cache hits and misses
    pub fn group_key_stats(&self) -> (u64, u64) {
        self.group_keys
            .cache()
            .map(|cache| cache.stats())
            .unwrap_or_default()
    }

    fn connector(&self, backend: &str) -> Result<&SharedConnector> {
        self.connectors
            .get(backend)
            .ok_or_else(|| ExecutorError::UnknownBackend(backend.to_string()))
    }

    fn resolver(&self, backend: &str, codec: Codec) -> Result<Resolver> {
        Ok(Resolver::new(
            self.connector(backend)?.clone(),
            self.group_keys.clone(),
            self.time_source.clone(),
            codec,
        ))
    }

    /// Decode, run and encode one request
    pub async fn handle(&self, message: Message) -> Message {
        let response = match ExecutorRequest::from_message(message) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                warn!("Malformed executor request: {}", e);
                ExecutorResponse::error("", ErrorKind::Deserialize, e.to_string())
            }
        };
        response.into_message()
    }

    /// Run a typed request, turning failures into error responses
    pub async fn dispatch(&self, request: ExecutorRequest) -> ExecutorResponse {
        let operation = request.operation();
        let backend = match &request {
            ExecutorRequest::Read(r) => r.backend.clone(),
            ExecutorRequest::Prepare(r) => r.backend.clone(),
            ExecutorRequest::Commit(r) => r.backend.clone(),
            ExecutorRequest::Abort(r) => r.backend.clone(),
            ExecutorRequest::GroupKeyCreate(r)
            | ExecutorRequest::GroupKeyRead(r)
            | ExecutorRequest::GroupKeyDelete(r) => r.location.backend.clone(),
        };

        let result = match request {
            ExecutorRequest::Read(r) => reply(&backend, self.read(r).await),
            ExecutorRequest::Prepare(r) => reply(&backend, self.prepare(r).await),
            ExecutorRequest::Commit(r) => reply(&backend, self.commit(r).await),
            ExecutorRequest::Abort(r) => reply(&backend, self.abort(r).await),
            ExecutorRequest::GroupKeyCreate(r) => reply(&backend, self.group_key_create(r).await),
            ExecutorRequest::GroupKeyRead(r) => reply(&backend, self.group_key_read(r).await),
            ExecutorRequest::GroupKeyDelete(r) => reply(&backend, self.group_key_delete(r).await),
        };

        result.unwrap_or_else(|e| {
            let kind = e.kind();
            match kind {
                ErrorKind::KeyNotFound | ErrorKind::VersionMismatch | ErrorKind::KeyExists => {
                    debug!("{} on {} failed: {}", operation.as_str(), backend, e)
                }
                _ => warn!("{} on {} failed: {}", operation.as_str(), backend, e),
            }
            ExecutorResponse::error(backend, kind, e.to_string())
        })
    }

    /// Visibility-processed read
    pub async fn read(&self, request: ReadRequest) -> Result<ReadReply> {
        let config = request.config;
        let resolver = self.resolver(&request.backend, config.codec)?;
        let Some(record) = resolver.fetch(&request.key).await? else {
            return Ok(ReadReply::default());
        };

        let group_key_list = record.group_key_list.clone();
        let visible = resolver
            .visible(&request.key, record, request.start_time, &config)
            .await?;
        let strategy = visible
            .assumption
            .as_ref()
            .map_or(ReadStrategy::Pessimistic, |assumption| assumption.strategy);
        Ok(ReadReply {
            record: visible.record,
            strategy,
            group_key_list,
            concurrent: visible.concurrent,
            assumption: visible.assumption,
        })
    }

    /// Validate assumptions and write every item as prepared.
    ///
    /// The commit time proposal comes from this executor's clock, never
    /// earlier than just after the reader's start time.
    pub async fn prepare(&self, mut request: PrepareRequest) -> Result<PrepareReply> {
        let config = request.config;
        let resolver = self.resolver(&request.backend, config.codec)?;
        let decided = resolver.validate(&request.validations).await?;

        let now = self
            .time_source
            .now()
            .await
            .map_err(DatastoreError::from)?;
        let t_commit = now.max(request.start_time.saturating_add(1));

        let mut items = std::mem::take(&mut request.items);
        items.sort_by(|a, b| a.key.cmp(&b.key));

        let prepared = match request.concurrency {
            ConcurrencyLevel::Sequential => {
                let mut prepared = Vec::with_capacity(items.len());
                for item in items {
                    prepared.push(
                        self.prepare_item(&resolver, &request, item, t_commit, &decided)
                            .await?,
                    );
                }
                prepared
            }
            ConcurrencyLevel::Parallel => join_all(
                items
                    .into_iter()
                    .map(|item| self.prepare_item(&resolver, &request, item, t_commit, &decided)),
            )
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?,
        };
        let versions: HashMap<String, String> = prepared
            .into_iter()
            .map(|record| (record.key, record.version))
            .collect();

        debug!(
            "Prepared {} item(s) on {} at {}",
            versions.len(),
            request.backend,
            t_commit
        );
        Ok(PrepareReply { versions, t_commit })
    }

    async fn prepare_item(
        &self,
        resolver: &Resolver,
        request: &PrepareRequest,
        mut item: VersionedRecord,
        t_commit: u64,
        decided: &HashMap<String, GroupKeyItem>,
    ) -> Result<VersionedRecord> {
        let config = &request.config;
        let do_create = if !item.version.is_empty() {
            // Read-modify-write: the chain was linked by the client
            item.txn_state = TxnState::Prepared;
            item.t_valid = t_commit;
            item.t_lease = t_commit.saturating_add(config.lease_time);
            false
        } else {
            let old = if request.invisible.contains(&item.key) {
                None
            } else {
                resolver
                    .discover(&item.key, request.start_time, config)
                    .await?
            };
            item.update_metadata(
                old.as_ref(),
                t_commit,
                config.lease_time,
                config.max_record_length,
                &config.codec,
            )
            .map_err(DatastoreError::from)?;
            old.is_none()
        };
        item.group_key_list = request.group_key_list.clone();

        Ok(resolver.write_prepared(item, do_create, decided).await?)
    }

    /// Flip prepared records with one conditional commit each
    pub async fn commit(&self, request: CommitRequest) -> Result<()> {
        let connector = self.connector(&request.backend)?;
        let results = join_all(request.items.iter().map(|info| {
            connector.conditional_commit(&info.key, &info.version, request.t_commit)
        }))
        .await;

        for (info, result) in request.items.iter().zip(results) {
            match result {
                Ok(_) => {}
                Err(ConnectorError::VersionMismatch { .. }) => {
                    debug!("{} was already resolved by a reader", info.key)
                }
                Err(e) => return Err(DatastoreError::from(e).into()),
            }
        }
        Ok(())
    }

    /// Roll back the keys still owned by the aborting transaction
    pub async fn abort(&self, request: AbortRequest) -> Result<()> {
        let resolver = self.resolver(&request.backend, request.codec)?;
        let results = join_all(
            request
                .keys
                .iter()
                .map(|key| resolver.rollback_owned(key, &request.group_key_list)),
        )
        .await;

        let mut first_error = None;
        for (key, result) in request.keys.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to roll back {} on {}: {}", key, request.backend, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn owned(&self, location: &GroupKeyLocation) -> Result<()> {
        if self.connectors.contains_key(&location.backend) {
            Ok(())
        } else {
            Err(ExecutorError::UnknownBackend(location.backend.clone()))
        }
    }

    pub async fn group_key_create(&self, request: GroupKeyRequest) -> Result<GroupKeyReply> {
        self.owned(&request.location)?;
        let item = request.item.ok_or_else(|| {
            DatastoreError::GroupKey(format!("create at {} without a value", request.location))
        })?;
        let decided = self.local_store.create(&request.location, &item).await?;
        Ok(GroupKeyReply {
            item: Some(decided),
        })
    }

    pub async fn group_key_read(&self, request: GroupKeyRequest) -> Result<GroupKeyReply> {
        self.owned(&request.location)?;
        Ok(GroupKeyReply {
            item: self.local_store.read(&request.location).await?,
        })
    }

    pub async fn group_key_delete(&self, request: GroupKeyRequest) -> Result<()> {
        self.owned(&request.location)?;
        Ok(self.local_store.delete(&request.location).await?)
    }
}

fn reply<T: Serialize>(backend: &str, result: Result<T>) -> Result<ExecutorResponse> {
    let payload = result?;
    Ok(ExecutorResponse::ok(backend, &payload)?)
}
