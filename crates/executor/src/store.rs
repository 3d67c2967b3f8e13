//! Group key storage as seen from an executor
//!
//! Locations on backends this executor serves are handled through their
//! connectors. Anything else goes to the peer store, normally a client of
//! the executors that do serve those backends.

use async_trait::async_trait;
use crossbar_connector::SharedConnector;
use crossbar_datastore::{ConnectorGroupKeyStore, DatastoreError, GroupKeyStore, Result};
use crossbar_record::{GroupKeyItem, GroupKeyLocation};
use std::collections::HashMap;
use std::sync::Arc;

pub struct RoutedGroupKeyStore {
    local: ConnectorGroupKeyStore,
    backends: Vec<String>,
    peers: Option<Arc<dyn GroupKeyStore>>,
}

impl RoutedGroupKeyStore {
    pub fn new(
        connectors: HashMap<String, SharedConnector>,
        peers: Option<Arc<dyn GroupKeyStore>>,
    ) -> Self {
        let backends = connectors.keys().cloned().collect();
        Self {
            local: ConnectorGroupKeyStore::new(connectors),
            backends,
            peers,
        }
    }

    fn route(&self, location: &GroupKeyLocation) -> Result<&dyn GroupKeyStore> {
        if self.backends.contains(&location.backend) {
            return Ok(&self.local);
        }
        self.peers.as_deref().ok_or_else(|| {
            DatastoreError::GroupKey(format!("no route to group key location {}", location))
        })
    }
}

#[async_trait]
impl GroupKeyStore for RoutedGroupKeyStore {
    async fn create(
        &self,
        location: &GroupKeyLocation,
        item: &GroupKeyItem,
    ) -> Result<GroupKeyItem> {
        self.route(location)?.create(location, item).await
    }

    async fn read(&self, location: &GroupKeyLocation) -> Result<Option<GroupKeyItem>> {
        self.route(location)?.read(location).await
    }

    async fn delete(&self, location: &GroupKeyLocation) -> Result<()> {
        self.route(location)?.delete(location).await
    }
}
