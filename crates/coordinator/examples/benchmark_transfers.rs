//! Benchmark for contended transfers between two backends
//!
//! Spawns several clients that move one unit at a time between accounts
//! held on different in-memory backends, retrying on conflict, then checks
//! that the total balance is unchanged.

use crossbar_clock::{MonotonicTimeSource, SharedTimeSource};
use crossbar_connector::{MemoryConnector, SharedConnector};
use crossbar_coordinator::{TransactionConfig, TransactionFactory};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const ACCOUNTS: usize = 16;
const CLIENTS: usize = 8;
const TRANSFERS_PER_CLIENT: usize = 500;
const INITIAL_BALANCE: i64 = 1_000;

fn account(i: usize) -> (&'static str, String) {
    let backend = if i % 2 == 0 { "ledger-a" } else { "ledger-b" };
    (backend, format!("account-{}", i))
}

#[tokio::main]
async fn main() {
    println!("=== Contended Transfer Benchmark ===\n");

    let connectors: HashMap<String, SharedConnector> = ["ledger-a", "ledger-b"]
        .into_iter()
        .map(|name| (name.to_string(), Arc::new(MemoryConnector::new(name)) as SharedConnector))
        .collect();
    let clock: SharedTimeSource = Arc::new(MonotonicTimeSource::new());
    let factory = Arc::new(TransactionFactory::local(
        connectors,
        clock,
        TransactionConfig::default(),
    ));

    println!("Step 1: Opening {} accounts...", ACCOUNTS);
    let mut txn = factory.begin().await.unwrap();
    for i in 0..ACCOUNTS {
        let (backend, key) = account(i);
        txn.write(backend, &key, &INITIAL_BALANCE).unwrap();
    }
    txn.commit().await.unwrap();
    txn.wait_for_cleanup().await;

    println!(
        "Step 2: {} clients x {} transfers...",
        CLIENTS, TRANSFERS_PER_CLIENT
    );
    let conflicts = Arc::new(AtomicU64::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for client in 0..CLIENTS {
        let factory = factory.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            for n in 0..TRANSFERS_PER_CLIENT {
                let from = account((client + n) % ACCOUNTS);
                let to = account((client + n * 7 + 1) % ACCOUNTS);
                if from == to {
                    continue;
                }
                loop {
                    let mut txn = factory.begin().await.unwrap();
                    let debit: i64 = match txn.read(from.0, &from.1).await {
                        Ok(balance) => balance,
                        Err(e) if e.is_conflict() => {
                            conflicts.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        Err(e) => panic!("read failed: {}", e),
                    };
                    let credit: i64 = match txn.read(to.0, &to.1).await {
                        Ok(balance) => balance,
                        Err(e) if e.is_conflict() => {
                            conflicts.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        Err(e) => panic!("read failed: {}", e),
                    };
                    txn.write(from.0, &from.1, &(debit - 1)).unwrap();
                    txn.write(to.0, &to.1, &(credit + 1)).unwrap();
                    match txn.commit().await {
                        Ok(()) => break,
                        Err(e) if e.is_conflict() => {
                            conflicts.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => panic!("commit failed: {}", e),
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let elapsed = start.elapsed();

    let total_transfers = CLIENTS * TRANSFERS_PER_CLIENT;
    println!("\n=== Results ===");
    println!("Transfers: {}", total_transfers);
    println!("Conflicts retried: {}", conflicts.load(Ordering::Relaxed));
    println!("Time: {:.2?}", elapsed);
    println!(
        "Throughput: {:.0} transfers/sec",
        total_transfers as f64 / elapsed.as_secs_f64()
    );

    println!("\nStep 3: Verifying balances...");
    let mut txn = factory.begin().await.unwrap();
    let mut total = 0i64;
    for i in 0..ACCOUNTS {
        let (backend, key) = account(i);
        let balance: i64 = txn.read(backend, &key).await.unwrap();
        total += balance;
    }
    assert_eq!(total, INITIAL_BALANCE * ACCOUNTS as i64);
    println!("Total balance preserved: {}", total);
}
