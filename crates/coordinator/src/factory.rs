//! Transaction factory
//!
//! Holds one prototype datastore engine per backend and stamps out
//! transactions with fresh copies of them.

use crate::config::TransactionConfig;
use crate::transaction::Transaction;
use crossbar_clock::SharedTimeSource;
use crossbar_connector::SharedConnector;
use crossbar_datastore::{Datastore, GroupKeyMaintainer, GroupKeyStore, RemoteClient};
use crossbar_engine::EngineClient;
use crossbar_executor::ExecutorClient;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Creates transactions over a fixed set of backends
pub struct TransactionFactory {
    prototypes: BTreeMap<String, Datastore>,
    group_keys: Arc<GroupKeyMaintainer>,
    time_source: SharedTimeSource,
    config: TransactionConfig,
}

impl TransactionFactory {
    /// Transactions that drive backend connectors directly
    pub fn local(
        connectors: HashMap<String, SharedConnector>,
        time_source: SharedTimeSource,
        config: TransactionConfig,
    ) -> Self {
        let group_keys = Arc::new(GroupKeyMaintainer::with_connectors(connectors.clone()));
        let prototypes = connectors
            .into_iter()
            .map(|(name, connector)| (name.clone(), Datastore::local(name, connector)))
            .collect();
        Self {
            prototypes,
            group_keys,
            time_source,
            config,
        }
    }

    /// Transactions that delegate every backend call to `client`
    pub fn remote_with_client(
        backends: impl IntoIterator<Item = String>,
        client: Arc<dyn RemoteClient>,
        group_key_store: Arc<dyn GroupKeyStore>,
        time_source: SharedTimeSource,
        config: TransactionConfig,
    ) -> Self {
        let prototypes = backends
            .into_iter()
            .map(|name| (name.clone(), Datastore::remote(name, client.clone())))
            .collect();
        Self {
            prototypes,
            group_keys: Arc::new(GroupKeyMaintainer::new(group_key_store)),
            time_source,
            config,
        }
    }

    /// Transactions served by executors on the engine.
    ///
    /// `routes` maps each backend to the subjects of the executors serving it.
    pub fn remote(
        engine_client: EngineClient,
        routes: HashMap<String, Vec<String>>,
        time_source: SharedTimeSource,
        config: TransactionConfig,
    ) -> Self {
        let backends: Vec<String> = routes.keys().cloned().collect();
        let client = routes.into_iter().fold(
            ExecutorClient::new(engine_client, config.rpc_timeout),
            |client, (backend, subjects)| {
                subjects
                    .into_iter()
                    .fold(client, |client, subject| client.with_route(backend.clone(), subject))
            },
        );
        let client = Arc::new(client);
        Self::remote_with_client(backends, client.clone(), client, time_source, config)
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Backend names in order
    pub fn backends(&self) -> Vec<&str> {
        self.prototypes.keys().map(String::as_str).collect()
    }

    pub fn group_keys(&self) -> &Arc<GroupKeyMaintainer> {
        &self.group_keys
    }

    /// A new, not yet started transaction over every backend
    pub fn create(&self) -> Transaction {
        let datastores = self
            .prototypes
            .iter()
            .map(|(name, prototype)| (name.clone(), prototype.copy()))
            .collect();
        Transaction::new(
            datastores,
            self.group_keys.clone(),
            self.time_source.clone(),
            self.config,
        )
    }

    /// Create and start a transaction
    pub async fn begin(&self) -> crate::Result<Transaction> {
        let mut txn = self.create();
        txn.start().await?;
        Ok(txn)
    }
}
