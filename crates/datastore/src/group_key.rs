//! Group key maintenance
//!
//! A group key is the lazily written outcome of one transaction, replicated
//! at a small ordered set of locations. The first location is the primary:
//! its atomic create decides the outcome, and the decided value is then
//! copied to the remaining locations. Every location that holds a value
//! therefore holds the same one, and any single successful read is
//! authoritative.

use crate::error::{DatastoreError, Result};
use async_trait::async_trait;
use crossbar_connector::{ConnectorError, SharedConnector};
use crossbar_record::{GroupKeyItem, GroupKeyLocation};
use futures::future::join_all;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Storage capability for group keys at individual locations
#[async_trait]
pub trait GroupKeyStore: Send + Sync {
    /// Atomically create `item` at `location`.
    ///
    /// Returns the value stored there afterwards: `item` if this call
    /// created it, otherwise the value that won.
    async fn create(&self, location: &GroupKeyLocation, item: &GroupKeyItem)
    -> Result<GroupKeyItem>;

    /// Read the value at `location`, `None` when absent
    async fn read(&self, location: &GroupKeyLocation) -> Result<Option<GroupKeyItem>>;

    /// Remove the value at `location`
    async fn delete(&self, location: &GroupKeyLocation) -> Result<()>;
}

/// Group key store over directly reachable backend connectors
pub struct ConnectorGroupKeyStore {
    connectors: HashMap<String, SharedConnector>,
}

impl ConnectorGroupKeyStore {
    pub fn new(connectors: HashMap<String, SharedConnector>) -> Self {
        Self { connectors }
    }

    fn connector(&self, location: &GroupKeyLocation) -> Result<&SharedConnector> {
        self.connectors.get(&location.backend).ok_or_else(|| {
            DatastoreError::GroupKey(format!("no connector for location {}", location))
        })
    }
}

#[async_trait]
impl GroupKeyStore for ConnectorGroupKeyStore {
    async fn create(
        &self,
        location: &GroupKeyLocation,
        item: &GroupKeyItem,
    ) -> Result<GroupKeyItem> {
        let connector = self.connector(location)?;
        match connector
            .atomic_create(location.storage_key(), &item.encode()?)
            .await
        {
            Ok(()) => Ok(*item),
            Err(ConnectorError::KeyExists { existing, .. }) => Ok(GroupKeyItem::decode(&existing)?),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, location: &GroupKeyLocation) -> Result<Option<GroupKeyItem>> {
        let connector = self.connector(location)?;
        match connector.get(location.storage_key()).await {
            Ok(raw) => Ok(Some(GroupKeyItem::decode(&raw)?)),
            Err(ConnectorError::KeyNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, location: &GroupKeyLocation) -> Result<()> {
        let connector = self.connector(location)?;
        Ok(connector.delete(location.storage_key()).await?)
    }
}

/// Cache of decided outcomes
///
/// A decided group key never changes value, so entries never go stale.
/// When full, the least recently used entry is evicted.
pub struct GroupKeyCache {
    entries: Mutex<LruCache<String, GroupKeyItem>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl GroupKeyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<GroupKeyItem> {
        let found = self.entries.lock().get(key).copied();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn insert(&self, key: String, item: GroupKeyItem) {
        self.entries.lock().put(key, item);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// `(hits, misses)` since creation
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

/// Result of creating a group key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupKeyOutcome {
    /// The decided value; may differ from what was requested
    pub item: GroupKeyItem,
    /// Locations that now hold the decided value
    pub successes: usize,
}

/// Creates, reads and deletes transaction outcome records
pub struct GroupKeyMaintainer {
    store: Arc<dyn GroupKeyStore>,
    cache: Option<GroupKeyCache>,
}

impl GroupKeyMaintainer {
    /// Create a new maintainer over a store
    pub fn new(store: Arc<dyn GroupKeyStore>) -> Self {
        Self { store, cache: None }
    }

    /// Create a maintainer over local backend connectors
    pub fn with_connectors(connectors: HashMap<String, SharedConnector>) -> Self {
        Self::new(Arc::new(ConnectorGroupKeyStore::new(connectors)))
    }

    /// Enable caching of decided outcomes
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = Some(GroupKeyCache::new(capacity));
        self
    }

    pub fn cache(&self) -> Option<&GroupKeyCache> {
        self.cache.as_ref()
    }

    fn cache_key(locations: &[GroupKeyLocation]) -> Option<String> {
        locations.first().map(ToString::to_string)
    }

    /// Decide an outcome at the primary location and replicate it.
    ///
    /// Fails only when the primary cannot be written; replica failures are
    /// logged and reflected in `successes`. Replicas only ever copy the
    /// primary's decision, so while the primary is unreachable neither a
    /// commit nor a lease-expiry abort can be decided, even with every
    /// replica reachable.
    pub async fn create(
        &self,
        locations: &[GroupKeyLocation],
        item: GroupKeyItem,
    ) -> Result<GroupKeyOutcome> {
        let (primary, replicas) = locations
            .split_first()
            .ok_or_else(|| DatastoreError::GroupKey("no group key locations".to_string()))?;

        let decided = self.store.create(primary, &item).await?;
        if decided != item {
            debug!(
                "Group key {} already decided as {}",
                primary, decided.txn_state
            );
        }

        let results = join_all(
            replicas
                .iter()
                .map(|location| self.store.create(location, &decided)),
        )
        .await;

        let mut successes = 1;
        for (location, result) in replicas.iter().zip(results) {
            match result {
                Ok(stored) if stored == decided => successes += 1,
                Ok(stored) => warn!(
                    "Group key replica {} holds {} but {} was decided",
                    location, stored.txn_state, decided.txn_state
                ),
                Err(e) => warn!("Failed to replicate group key to {}: {}", location, e),
            }
        }

        if let (Some(cache), Some(key)) = (&self.cache, Self::cache_key(locations)) {
            cache.insert(key, decided);
        }

        Ok(GroupKeyOutcome {
            item: decided,
            successes,
        })
    }

    /// Read the outcome from any location.
    ///
    /// Returns `None` when no location holds a value or none is reachable;
    /// the caller then treats the outcome as unknown.
    pub async fn read(&self, locations: &[GroupKeyLocation]) -> Result<Option<GroupKeyItem>> {
        if locations.is_empty() {
            return Ok(None);
        }
        if let (Some(cache), Some(key)) = (&self.cache, Self::cache_key(locations))
            && let Some(item) = cache.get(&key)
        {
            return Ok(Some(item));
        }

        let results = join_all(locations.iter().map(|location| self.store.read(location))).await;

        let mut found = None;
        for (location, result) in locations.iter().zip(results) {
            match result {
                Ok(Some(item)) => {
                    found = Some(item);
                    break;
                }
                Ok(None) => {}
                Err(e) => debug!("Group key read at {} failed: {}", location, e),
            }
        }

        if let (Some(item), Some(cache), Some(key)) =
            (found, &self.cache, Self::cache_key(locations))
        {
            cache.insert(key, item);
        }
        Ok(found)
    }

    /// Best-effort removal from every location
    pub async fn delete(&self, locations: &[GroupKeyLocation]) {
        let results =
            join_all(locations.iter().map(|location| self.store.delete(location))).await;
        for (location, result) in locations.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to delete group key at {}: {}", location, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbar_common::TransactionId;
    use crossbar_connector::{Connector, FaultyConnector, MemoryConnector};

    struct Fixture {
        memories: Vec<Arc<MemoryConnector>>,
        faulty: Vec<Arc<FaultyConnector>>,
        maintainer: GroupKeyMaintainer,
        locations: Vec<GroupKeyLocation>,
    }

    async fn fixture(backends: &[&str]) -> Fixture {
        let txn = TransactionId::new();
        let mut connectors: HashMap<String, SharedConnector> = HashMap::new();
        let mut memories = Vec::new();
        let mut faulty = Vec::new();
        let mut locations = Vec::new();
        for name in backends {
            let memory = Arc::new(MemoryConnector::new(*name));
            let wrapped = Arc::new(FaultyConnector::new(memory.clone()));
            wrapped.connect().await.unwrap();
            connectors.insert(name.to_string(), wrapped.clone());
            memories.push(memory);
            faulty.push(wrapped);
            locations.push(GroupKeyLocation::new(*name, &txn));
        }
        Fixture {
            memories,
            faulty,
            maintainer: GroupKeyMaintainer::with_connectors(connectors),
            locations,
        }
    }

    #[tokio::test]
    async fn test_create_replicates_everywhere() {
        let f = fixture(&["a", "b", "c"]).await;
        let outcome = f
            .maintainer
            .create(&f.locations, GroupKeyItem::committed(9))
            .await
            .unwrap();
        assert_eq!(outcome.successes, 3);
        assert_eq!(outcome.item, GroupKeyItem::committed(9));
        for (memory, location) in f.memories.iter().zip(&f.locations) {
            let raw = memory.peek_metadata(location.storage_key()).unwrap();
            assert!(GroupKeyItem::decode(&raw).unwrap().is_committed());
        }
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let f = fixture(&["a", "b"]).await;
        f.maintainer
            .create(&f.locations, GroupKeyItem::aborted())
            .await
            .unwrap();
        let outcome = f
            .maintainer
            .create(&f.locations, GroupKeyItem::committed(5))
            .await
            .unwrap();
        assert!(outcome.item.is_aborted());
        assert_eq!(outcome.successes, 2);
    }

    #[tokio::test]
    async fn test_primary_failure_is_error() {
        let f = fixture(&["a", "b"]).await;
        f.faulty[0].faults().set_fail_atomic_create(true);
        assert!(
            f.maintainer
                .create(&f.locations, GroupKeyItem::committed(1))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_replica_failure_counts() {
        let f = fixture(&["a", "b", "c"]).await;
        f.faulty[2].faults().set_offline(true);
        let outcome = f
            .maintainer
            .create(&f.locations, GroupKeyItem::committed(1))
            .await
            .unwrap();
        assert_eq!(outcome.successes, 2);
    }

    #[tokio::test]
    async fn test_any_single_location_is_authoritative() {
        let f = fixture(&["a", "b"]).await;
        f.maintainer
            .create(&f.locations, GroupKeyItem::committed(3))
            .await
            .unwrap();

        // Primary unreachable, replica answers
        f.faulty[0].faults().set_offline(true);
        let item = f.maintainer.read(&f.locations).await.unwrap().unwrap();
        assert_eq!(item.t_commit, 3);

        // Nothing reachable: unknown
        f.faulty[1].faults().set_offline(true);
        assert_eq!(f.maintainer.read(&f.locations).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_is_none() {
        let f = fixture(&["a"]).await;
        assert_eq!(f.maintainer.read(&f.locations).await.unwrap(), None);
        assert_eq!(f.maintainer.read(&[]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_is_best_effort() {
        let f = fixture(&["a", "b"]).await;
        f.maintainer
            .create(&f.locations, GroupKeyItem::committed(3))
            .await
            .unwrap();
        f.faulty[1].faults().set_fail_delete(true);
        f.maintainer.delete(&f.locations).await;
        assert!(f.memories[0].peek_metadata(f.locations[0].storage_key()).is_none());
        assert!(f.memories[1].peek_metadata(f.locations[1].storage_key()).is_some());
    }

    #[tokio::test]
    async fn test_cache_serves_decided_outcomes() {
        let f = fixture(&["a"]).await;
        let maintainer = GroupKeyMaintainer::new(Arc::new(ConnectorGroupKeyStore::new(
            HashMap::from([("a".to_string(), f.faulty[0].clone() as SharedConnector)]),
        )))
        .with_cache(16);

        maintainer
            .create(&f.locations, GroupKeyItem::committed(4))
            .await
            .unwrap();
        f.faulty[0].faults().set_offline(true);

        let item = maintainer.read(&f.locations).await.unwrap().unwrap();
        assert_eq!(item.t_commit, 4);
        let cache = maintainer.cache().unwrap();
        assert_eq!(cache.stats(), (1, 0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_evicts_least_recently_used() {
        let cache = GroupKeyCache::new(3);
        for i in 0..3 {
            cache.insert(format!("k{}", i), GroupKeyItem::committed(i));
        }
        // Touch k0 so k1 becomes the eviction candidate
        assert!(cache.get("k0").is_some());
        cache.insert("k3".to_string(), GroupKeyItem::committed(3));

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("k1"), None);
        assert_eq!(cache.get("k0").map(|item| item.t_commit), Some(0));
        assert_eq!(cache.get("k2").map(|item| item.t_commit), Some(2));
        assert_eq!(cache.get("k3").map(|item| item.t_commit), Some(3));
    }

    #[tokio::test]
    async fn test_unreachable_primary_blocks_decision() {
        let f = fixture(&["a", "b", "c"]).await;
        f.faulty[0].faults().set_offline(true);

        // Neither outcome can be decided through the replicas
        for item in [GroupKeyItem::committed(1), GroupKeyItem::aborted()] {
            assert!(f.maintainer.create(&f.locations, item).await.is_err());
        }
        for (memory, location) in f.memories.iter().zip(&f.locations).skip(1) {
            assert!(memory.peek_metadata(location.storage_key()).is_none());
        }
    }
}
