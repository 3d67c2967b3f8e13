use crossbar_clock::{ManualTimeSource, SharedTimeSource};
use crossbar_connector::{MemoryConnector, SharedConnector};
use crossbar_coordinator::{TransactionConfig, TransactionFactory};
use crossbar_datastore::GroupKeyStore;
use crossbar_engine::{Engine, EngineClient};
use crossbar_executor::{Executor, ExecutorClient, ExecutorConfig, ExecutorServer};
use crossbar_record::{ConcurrencyLevel, GroupKeyLocation};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const BACKENDS: [&str; 2] = ["dynamo", "redis"];

struct Deployment {
    engine: Arc<Engine>,
    clock: Arc<ManualTimeSource>,
    memories: HashMap<String, Arc<MemoryConnector>>,
    _servers: Vec<ExecutorServer>,
}

fn subject(backend: &str) -> String {
    format!("executor.{}", backend)
}

/// One executor per backend sharing a clock with the coordinators
async fn deploy() -> Deployment {
    deploy_with_latency(Duration::ZERO).await
}

async fn deploy_with_latency(latency: Duration) -> Deployment {
    let engine = Arc::new(Engine::new());
    let clock = Arc::new(ManualTimeSource::new(1_000));
    let mut memories = HashMap::new();
    let mut servers = Vec::new();

    for backend in BACKENDS {
        let memory = Arc::new(MemoryConnector::new(backend).with_latency(latency));
        memories.insert(backend.to_string(), memory.clone());

        let peers = BACKENDS.iter().fold(
            ExecutorClient::new(
                EngineClient::new(format!("peers.{}", backend), engine.clone()),
                Duration::from_secs(1),
            ),
            |client, other| client.with_route(*other, subject(other)),
        );
        let peers: Arc<dyn GroupKeyStore> = Arc::new(peers);
        let executor = Arc::new(Executor::new(
            HashMap::from([(backend.to_string(), memory as SharedConnector)]),
            clock.clone() as SharedTimeSource,
            ExecutorConfig::default(),
            Some(peers),
        ));
        executor.connect().await.unwrap();

        let server = ExecutorServer::new(
            subject(backend),
            executor,
            engine.clone(),
            ExecutorConfig::default(),
        );
        server.start();
        servers.push(server);
    }

    Deployment {
        engine,
        clock,
        memories,
        _servers: servers,
    }
}

impl Deployment {
    fn factory(&self, name: &str, config: TransactionConfig) -> TransactionFactory {
        let routes = BACKENDS
            .iter()
            .map(|backend| (backend.to_string(), vec![subject(backend)]))
            .collect();
        TransactionFactory::remote(
            EngineClient::new(name, self.engine.clone()),
            routes,
            self.clock.clone() as SharedTimeSource,
            config,
        )
    }
}

#[tokio::test]
async fn test_remote_commit_across_backends() {
    let deployment = deploy().await;
    let factory = deployment.factory("app", TransactionConfig::default().with_async_commit(false));
    assert_eq!(factory.backends(), vec!["dynamo", "redis"]);

    deployment.clock.advance(1);
    let mut txn = factory.begin().await.unwrap();
    txn.write("dynamo", "order", "placed").unwrap();
    txn.write("redis", "stock", &41u32).unwrap();
    deployment.clock.advance(1);
    txn.commit().await.unwrap();
    assert!(txn.wait_for_cleanup().await);

    for backend in BACKENDS {
        let key = if backend == "dynamo" { "order" } else { "stock" };
        let stored = deployment.memories[backend].peek(key).unwrap();
        assert!(stored.is_committed());
        assert_eq!(stored.t_valid, txn.commit_time());
    }
    let locations: Vec<GroupKeyLocation> = BACKENDS
        .iter()
        .map(|backend| GroupKeyLocation::new(*backend, &txn.id().unwrap()))
        .collect();
    assert!(factory.group_keys().read(&locations).await.unwrap().is_none());

    deployment.clock.advance(1);
    let mut reader = factory.begin().await.unwrap();
    let order: String = reader.read("dynamo", "order").await.unwrap();
    let stock: u32 = reader.read("redis", "stock").await.unwrap();
    assert_eq!(order, "placed");
    assert_eq!(stock, 41);
}

#[tokio::test]
async fn test_remote_conflict_between_coordinators() {
    let deployment = deploy().await;
    let config = TransactionConfig::default().with_async_commit(false);
    let alice = deployment.factory("alice", config);
    let bob = deployment.factory("bob", config);

    deployment.clock.advance(1);
    let mut seed = alice.begin().await.unwrap();
    seed.write("redis", "counter", &0u32).unwrap();
    deployment.clock.advance(1);
    seed.commit().await.unwrap();

    deployment.clock.advance(1);
    let mut first = alice.begin().await.unwrap();
    let mut second = bob.begin().await.unwrap();
    let a: u32 = first.read("redis", "counter").await.unwrap();
    let b: u32 = second.read("redis", "counter").await.unwrap();
    first.write("redis", "counter", &(a + 1)).unwrap();
    second.write("redis", "counter", &(b + 10)).unwrap();

    deployment.clock.advance(1);
    first.commit().await.unwrap();
    let err = second.commit().await.unwrap_err();
    assert!(err.is_conflict(), "unexpected error {:?}", err);

    deployment.clock.advance(1);
    let mut reader = bob.begin().await.unwrap();
    let value: u32 = reader.read("redis", "counter").await.unwrap();
    assert_eq!(value, 1);
}

#[tokio::test]
async fn test_remote_delete_and_not_found() {
    let deployment = deploy().await;
    let factory = deployment.factory("app", TransactionConfig::default());

    deployment.clock.advance(1);
    let mut txn = factory.begin().await.unwrap();
    txn.write("dynamo", "k", "v").unwrap();
    deployment.clock.advance(1);
    txn.commit().await.unwrap();
    txn.wait_for_cleanup().await;

    deployment.clock.advance(1);
    let mut txn = factory.begin().await.unwrap();
    let err = txn.read::<String>("redis", "k").await.unwrap_err();
    assert!(err.is_not_found());
    txn.delete("dynamo", "k").unwrap();
    deployment.clock.advance(1);
    txn.commit().await.unwrap();
    txn.wait_for_cleanup().await;

    deployment.clock.advance(1);
    let mut reader = factory.begin().await.unwrap();
    let err = reader.read::<String>("dynamo", "k").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(deployment.memories["dynamo"].peek("k").unwrap().is_deleted);
}

async fn timed_remote_commit(concurrency: ConcurrencyLevel) -> Duration {
    let deployment = deploy_with_latency(Duration::from_millis(20)).await;
    let config = TransactionConfig::default()
        .with_async_commit(false)
        .with_concurrency(concurrency);
    let factory = deployment.factory("app", config);

    deployment.clock.advance(1);
    let mut txn = factory.begin().await.unwrap();
    for i in 0..10 {
        txn.write("redis", &format!("k{}", i), "v").unwrap();
    }
    deployment.clock.advance(1);
    let started = tokio::time::Instant::now();
    txn.commit().await.unwrap();
    started.elapsed()
}

#[tokio::test(start_paused = true)]
async fn test_remote_prepare_honors_concurrency() {
    let sequential = timed_remote_commit(ConcurrencyLevel::Sequential).await;
    let parallel = timed_remote_commit(ConcurrencyLevel::Parallel).await;
    assert!(
        parallel * 2 < sequential,
        "parallel {:?} vs sequential {:?}",
        parallel,
        sequential
    );
}
