use crossbar_clock::{ManualTimeSource, SharedTimeSource};
use crossbar_common::{TransactionId, TxnState};
use crossbar_connector::{MemoryConnector, SharedConnector};
use crossbar_datastore::{ConcurrencyLevel, Datastore, DatastoreError, GroupKeyMaintainer, TxnContext};
use crossbar_record::{GroupKeyItem, GroupKeyLocation, ReadStrategy, RecordConfig};
use std::collections::HashMap;
use std::sync::Arc;

const BACKEND: &str = "mem";

struct Env {
    memory: Arc<MemoryConnector>,
    clock: Arc<ManualTimeSource>,
    group_keys: Arc<GroupKeyMaintainer>,
}

struct Txn {
    ds: Datastore,
    locations: Vec<GroupKeyLocation>,
    group_key_list: String,
}

impl Env {
    fn new() -> Self {
        let memory = Arc::new(MemoryConnector::new(BACKEND));
        let group_keys = Arc::new(GroupKeyMaintainer::with_connectors(HashMap::from([(
            BACKEND.to_string(),
            memory.clone() as SharedConnector,
        )])));
        Self {
            memory,
            clock: Arc::new(ManualTimeSource::new(0)),
            group_keys,
        }
    }

    async fn begin_with(
        &self,
        start_time: u64,
        config: RecordConfig,
        concurrency: ConcurrencyLevel,
    ) -> Txn {
        let txn_id = TransactionId::new();
        let locations = vec![GroupKeyLocation::new(BACKEND, &txn_id)];
        let ctx = Arc::new(TxnContext {
            txn_id,
            start_time,
            config,
            concurrency,
            time_source: self.clock.clone() as SharedTimeSource,
            group_keys: self.group_keys.clone(),
        });
        let mut ds = Datastore::local(BACKEND, self.memory.clone());
        ds.start(ctx).await.unwrap();
        Txn {
            ds,
            group_key_list: GroupKeyLocation::join(&locations),
            locations,
        }
    }

    async fn begin(&self, start_time: u64) -> Txn {
        self.begin_with(
            start_time,
            RecordConfig::default().with_max_record_length(4),
            ConcurrencyLevel::Sequential,
        )
        .await
    }

    /// Drive prepare, decision and flip for a single-backend transaction
    async fn commit(&self, txn: &mut Txn, commit_time: u64) -> Result<(), DatastoreError> {
        let t_commit = txn.ds.prepare(&txn.group_key_list, commit_time).await?;
        self.group_keys
            .create(&txn.locations, GroupKeyItem::committed(t_commit))
            .await?;
        txn.ds.commit(t_commit).await
    }

    async fn seed(&self, key: &str, value: &str, commit_time: u64) {
        let mut txn = self.begin(commit_time - 1).await;
        txn.ds.write(key, value.as_bytes().to_vec()).unwrap();
        self.commit(&mut txn, commit_time).await.unwrap();
    }
}

fn text(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap()
}

#[tokio::test]
async fn test_operations_require_start() {
    let env = Env::new();
    let mut ds = Datastore::local(BACKEND, env.memory.clone());
    assert!(matches!(ds.read("k").await, Err(DatastoreError::NotStarted(_))));
    assert!(matches!(ds.write("k", vec![1]), Err(DatastoreError::NotStarted(_))));
}

#[tokio::test]
async fn test_reads_own_writes_and_deletes() {
    let env = Env::new();
    let mut txn = env.begin(10).await;

    assert!(txn.ds.read("k").await.unwrap_err().is_not_found());
    txn.ds.write("k", b"v1".to_vec()).unwrap();
    assert_eq!(text(txn.ds.read("k").await.unwrap()), "v1");
    txn.ds.write("k", b"v2".to_vec()).unwrap();
    assert_eq!(text(txn.ds.read("k").await.unwrap()), "v2");

    txn.ds.delete("k").unwrap();
    assert!(txn.ds.read("k").await.unwrap_err().is_not_found());
    assert!(txn.ds.delete("k").unwrap_err().is_not_found());

    // Nothing reaches the backend before prepare
    assert_eq!(env.memory.record_count(), 0);
}

#[tokio::test]
async fn test_prepare_then_commit() {
    let env = Env::new();
    let mut txn = env.begin(10).await;
    txn.ds.write("a", b"1".to_vec()).unwrap();
    txn.ds.write("b", b"2".to_vec()).unwrap();

    let proposed = txn.ds.prepare(&txn.group_key_list, 20).await.unwrap();
    assert_eq!(proposed, 20);
    for key in ["a", "b"] {
        let stored = env.memory.peek(key).unwrap();
        assert_eq!(stored.txn_state, TxnState::Prepared);
        assert_eq!(stored.group_key_list, txn.group_key_list);
        assert_eq!(stored.t_valid, 20);
    }

    env.group_keys
        .create(&txn.locations, GroupKeyItem::committed(20))
        .await
        .unwrap();
    txn.ds.commit(20).await.unwrap();
    for key in ["a", "b"] {
        let stored = env.memory.peek(key).unwrap();
        assert!(stored.is_committed());
        assert_eq!(stored.t_valid, 20);
    }

    let mut reader = env.begin(30).await;
    assert_eq!(text(reader.ds.read("a").await.unwrap()), "1");
    assert_eq!(text(reader.ds.read("b").await.unwrap()), "2");
}

#[tokio::test]
async fn test_overwrite_keeps_previous_version() {
    let env = Env::new();
    env.seed("k", "v1", 10).await;

    let mut txn = env.begin(15).await;
    assert_eq!(text(txn.ds.read("k").await.unwrap()), "v1");
    txn.ds.write("k", b"v2".to_vec()).unwrap();
    env.commit(&mut txn, 20).await.unwrap();

    let stored = env.memory.peek("k").unwrap();
    assert_eq!(stored.linked_len, 2);

    // An older snapshot still finds v1 in the chain
    let mut old_reader = env.begin(12).await;
    assert_eq!(text(old_reader.ds.read("k").await.unwrap()), "v1");
}

#[tokio::test]
async fn test_read_modify_write_conflict() {
    let env = Env::new();
    env.seed("k", "0", 10).await;

    let mut first = env.begin(20).await;
    let mut second = env.begin(20).await;
    assert_eq!(text(first.ds.read("k").await.unwrap()), "0");
    assert_eq!(text(second.ds.read("k").await.unwrap()), "0");

    first.ds.write("k", b"1".to_vec()).unwrap();
    second.ds.write("k", b"2".to_vec()).unwrap();

    env.commit(&mut first, 30).await.unwrap();
    let err = second
        .ds
        .prepare(&second.group_key_list, 31)
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "unexpected error {:?}", err);
    assert_eq!(env.memory.peek("k").unwrap().value, b"1");
}

#[tokio::test]
async fn test_blind_write_after_newer_commit_conflicts() {
    let env = Env::new();
    env.seed("k", "0", 10).await;

    let mut late = env.begin(20).await;
    env.seed("k", "1", 30).await;

    late.ds.write("k", b"2".to_vec()).unwrap();
    let err = late.ds.prepare(&late.group_key_list, 40).await.unwrap_err();
    assert!(err.is_conflict(), "unexpected error {:?}", err);
}

#[tokio::test]
async fn test_concurrent_writer_stays_hidden() {
    let env = Env::new();
    env.seed("old", "before", 10).await;

    let mut writer = env.begin(90).await;
    writer.ds.write("old", b"after".to_vec()).unwrap();
    writer.ds.write("fresh", b"new".to_vec()).unwrap();
    writer.ds.prepare(&writer.group_key_list, 100).await.unwrap();

    let mut reader = env.begin(50).await;
    assert_eq!(text(reader.ds.read("old").await.unwrap()), "before");
    assert!(reader.ds.read("fresh").await.unwrap_err().is_not_found());

    env.group_keys
        .create(&writer.locations, GroupKeyItem::committed(100))
        .await
        .unwrap();
    writer.ds.commit(100).await.unwrap();

    // Repeated reads give the same answer after the writer commits
    assert_eq!(text(reader.ds.read("old").await.unwrap()), "before");
    assert!(reader.ds.read("fresh").await.unwrap_err().is_not_found());

    // A hidden key cannot be blindly created either
    reader.ds.write("fresh", b"mine".to_vec()).unwrap();
    let err = reader
        .ds
        .prepare(&reader.group_key_list, 110)
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "unexpected error {:?}", err);
}

#[tokio::test]
async fn test_abort_after_prepare_restores_records() {
    let env = Env::new();
    env.seed("k", "kept", 10).await;

    let mut txn = env.begin(20).await;
    txn.ds.read("k").await.unwrap();
    txn.ds.write("k", b"discarded".to_vec()).unwrap();
    txn.ds.write("new", b"discarded".to_vec()).unwrap();
    txn.ds.prepare(&txn.group_key_list, 30).await.unwrap();

    env.group_keys
        .create(&txn.locations, GroupKeyItem::aborted())
        .await
        .unwrap();
    txn.ds.abort(true, &txn.group_key_list).await.unwrap();

    let restored = env.memory.peek("k").unwrap();
    assert!(restored.is_committed());
    assert_eq!(restored.value, b"kept");
    let tombstone = env.memory.peek("new").unwrap();
    assert!(tombstone.is_deleted);

    let mut reader = env.begin(40).await;
    assert_eq!(text(reader.ds.read("k").await.unwrap()), "kept");
    assert!(reader.ds.read("new").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_abort_leaves_foreign_records_alone() {
    let env = Env::new();
    let mut loser = env.begin(20).await;
    loser.ds.write("k", b"loser".to_vec()).unwrap();

    env.seed("k", "winner", 30).await;
    assert!(loser.ds.prepare(&loser.group_key_list, 40).await.is_err());
    loser.ds.abort(true, &loser.group_key_list).await.unwrap();

    assert_eq!(env.memory.peek("k").unwrap().value, b"winner");
}

#[tokio::test]
async fn test_parallel_prepare() {
    let env = Env::new();
    let mut txn = env
        .begin_with(10, RecordConfig::default(), ConcurrencyLevel::Parallel)
        .await;
    for i in 0..16 {
        txn.ds.write(&format!("key-{:02}", i), vec![i]).unwrap();
    }
    env.commit(&mut txn, 20).await.unwrap();

    assert_eq!(env.memory.record_count(), 16);
    assert!(env.memory.peek("key-07").unwrap().is_committed());
}

#[tokio::test]
async fn test_assumed_read_is_validated_at_prepare() {
    let env = Env::new();
    env.seed("k", "0", 10).await;

    let mut writer = env.begin(15).await;
    writer.ds.write("k", b"1".to_vec()).unwrap();
    writer.ds.prepare(&writer.group_key_list, 20).await.unwrap();

    let mut reader = env
        .begin_with(
            30,
            RecordConfig::default().with_read_strategy(ReadStrategy::AssumeCommit),
            ConcurrencyLevel::Sequential,
        )
        .await;
    assert_eq!(text(reader.ds.read("k").await.unwrap()), "1");
    assert!(reader.ds.needs_prepare());

    env.group_keys
        .create(&writer.locations, GroupKeyItem::aborted())
        .await
        .unwrap();
    let err = reader
        .ds
        .prepare(&reader.group_key_list, 40)
        .await
        .unwrap_err();
    assert!(matches!(err, DatastoreError::DirtyRead(_)));
}

#[tokio::test]
async fn test_copy_has_fresh_state() {
    let env = Env::new();
    let mut txn = env.begin(10).await;
    txn.ds.write("k", b"v".to_vec()).unwrap();

    let copy = txn.ds.copy();
    assert_eq!(copy.name(), BACKEND);
    assert!(!copy.has_writes());
    assert!(txn.ds.has_writes());
}
