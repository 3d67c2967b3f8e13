//! In-memory backend
//!
//! Versions are a per-connector counter rendered as a string, so every
//! successful write yields a fresh token.

use crate::error::{ConnectorError, Result};
use crate::Connector;
use async_trait::async_trait;
use crossbar_common::TxnState;
use crossbar_record::VersionedRecord;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    records: HashMap<String, VersionedRecord>,
    metadata: HashMap<String, String>,
    next_version: u64,
}

impl Inner {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// Thread-safe in-memory connector
pub struct MemoryConnector {
    name: String,
    inner: Mutex<Inner>,
    connected: AtomicBool,
    latency: Option<Duration>,
}

impl MemoryConnector {
    /// Create a new, empty backend
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            connected: AtomicBool::new(false),
            latency: None,
        }
    }

    /// Delay every call by `latency` to widen race windows in tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the stored record, bypassing connection checks
    pub fn peek(&self, key: &str) -> Option<VersionedRecord> {
        self.inner.lock().records.get(key).cloned()
    }

    /// Snapshot of a stored metadata value
    pub fn peek_metadata(&self, name: &str) -> Option<String> {
        self.inner.lock().metadata.get(name).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().records.len()
    }

    async fn enter(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.connected.load(Ordering::Acquire) {
            return Err(ConnectorError::Unavailable(format!(
                "{} is not connected",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<VersionedRecord> {
        self.enter().await?;
        self.inner
            .lock()
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| ConnectorError::KeyNotFound(key.to_string()))
    }

    async fn conditional_update(
        &self,
        key: &str,
        record: &VersionedRecord,
        do_create: bool,
    ) -> Result<String> {
        self.enter().await?;
        let mut inner = self.inner.lock();
        match inner.records.get(key) {
            Some(_) if do_create => {
                return Err(ConnectorError::KeyExists {
                    key: key.to_string(),
                    existing: String::new(),
                });
            }
            Some(current) if current.version != record.version => {
                return Err(ConnectorError::VersionMismatch {
                    key: key.to_string(),
                    expected: record.version.clone(),
                    actual: current.version.clone(),
                });
            }
            None if !do_create => {
                return Err(ConnectorError::VersionMismatch {
                    key: key.to_string(),
                    expected: record.version.clone(),
                    actual: String::new(),
                });
            }
            _ => {}
        }

        let version = inner.bump();
        let mut stored = record.clone();
        stored.version = version.clone();
        inner.records.insert(key.to_string(), stored);
        Ok(version)
    }

    async fn conditional_commit(&self, key: &str, version: &str, t_commit: u64) -> Result<String> {
        self.enter().await?;
        let mut inner = self.inner.lock();
        let next = inner.next_version + 1;
        let current = inner
            .records
            .get_mut(key)
            .ok_or_else(|| ConnectorError::KeyNotFound(key.to_string()))?;
        if current.version != version {
            return Err(ConnectorError::VersionMismatch {
                key: key.to_string(),
                expected: version.to_string(),
                actual: current.version.clone(),
            });
        }
        current.txn_state = TxnState::Committed;
        current.t_valid = t_commit;
        current.version = next.to_string();
        inner.next_version = next;
        Ok(next.to_string())
    }

    async fn get(&self, name: &str) -> Result<String> {
        self.enter().await?;
        self.inner
            .lock()
            .metadata
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectorError::KeyNotFound(name.to_string()))
    }

    async fn put(&self, name: &str, value: &str) -> Result<()> {
        self.enter().await?;
        self.inner
            .lock()
            .metadata
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.enter().await?;
        self.inner.lock().metadata.remove(name);
        Ok(())
    }

    async fn atomic_create(&self, name: &str, value: &str) -> Result<()> {
        self.enter().await?;
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.metadata.get(name) {
            return Err(ConnectorError::KeyExists {
                key: name.to_string(),
                existing: existing.clone(),
            });
        }
        inner.metadata.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
