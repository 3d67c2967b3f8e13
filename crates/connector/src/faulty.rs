//! Fault injection wrapper
//!
//! Wraps another connector and fails selected operations while the matching
//! switch is on. Used to strand prepared records and to simulate outages.

use crate::error::{ConnectorError, Result};
use crate::{Connector, SharedConnector};
use async_trait::async_trait;
use crossbar_common::TxnState;
use crossbar_record::VersionedRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Switches controlling which operations fail
#[derive(Debug, Default)]
pub struct Faults {
    /// Every call fails with `Unavailable`
    pub offline: AtomicBool,
    /// Conditional updates writing a prepared record fail
    pub fail_prepare: AtomicBool,
    /// Conditional updates or commits writing a committed record fail
    pub fail_commit: AtomicBool,
    /// Atomic creates fail
    pub fail_atomic_create: AtomicBool,
    /// Metadata deletes fail
    pub fail_delete: AtomicBool,
}

impl Faults {
    pub fn set_offline(&self, on: bool) {
        self.offline.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_prepare(&self, on: bool) {
        self.fail_prepare.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_commit(&self, on: bool) {
        self.fail_commit.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_atomic_create(&self, on: bool) {
        self.fail_atomic_create.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, on: bool) {
        self.fail_delete.store(on, Ordering::SeqCst);
    }
}

/// Connector that forwards to an inner connector unless a fault is armed
pub struct FaultyConnector {
    inner: SharedConnector,
    faults: Faults,
}

impl FaultyConnector {
    pub fn new(inner: SharedConnector) -> Self {
        Self {
            inner,
            faults: Faults::default(),
        }
    }

    /// Access the fault switches
    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    fn check(&self, switch: &AtomicBool, op: &str) -> Result<()> {
        if self.faults.offline.load(Ordering::SeqCst) {
            return Err(ConnectorError::Unavailable(format!("{op}: backend offline")));
        }
        if switch.load(Ordering::SeqCst) {
            debug!("Injecting failure into {}", op);
            return Err(ConnectorError::Other(format!("{op}: injected failure")));
        }
        Ok(())
    }

    fn online(&self, op: &str) -> Result<()> {
        if self.faults.offline.load(Ordering::SeqCst) {
            return Err(ConnectorError::Unavailable(format!("{op}: backend offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for FaultyConnector {
    async fn connect(&self) -> Result<()> {
        self.online("connect")?;
        self.inner.connect().await
    }

    async fn get_item(&self, key: &str) -> Result<VersionedRecord> {
        self.online("get_item")?;
        self.inner.get_item(key).await
    }

    async fn conditional_update(
        &self,
        key: &str,
        record: &VersionedRecord,
        do_create: bool,
    ) -> Result<String> {
        match record.txn_state {
            TxnState::Prepared => self.check(&self.faults.fail_prepare, "conditional_update")?,
            _ => self.check(&self.faults.fail_commit, "conditional_update")?,
        }
        self.inner.conditional_update(key, record, do_create).await
    }

    async fn conditional_commit(&self, key: &str, version: &str, t_commit: u64) -> Result<String> {
        self.check(&self.faults.fail_commit, "conditional_commit")?;
        self.inner.conditional_commit(key, version, t_commit).await
    }

    async fn get(&self, name: &str) -> Result<String> {
        self.online("get")?;
        self.inner.get(name).await
    }

    async fn put(&self, name: &str, value: &str) -> Result<()> {
        self.online("put")?;
        self.inner.put(name, value).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.check(&self.faults.fail_delete, "delete")?;
        self.inner.delete(name).await
    }

    async fn atomic_create(&self, name: &str, value: &str) -> Result<()> {
        self.check(&self.faults.fail_atomic_create, "atomic_create")?;
        self.inner.atomic_create(name, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryConnector;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_faults_toggle() {
        let memory = Arc::new(MemoryConnector::new("mem"));
        let faulty = FaultyConnector::new(memory.clone());
        faulty.connect().await.unwrap();

        let mut record = VersionedRecord::new("k", b"v".to_vec());
        record.txn_state = TxnState::Prepared;

        faulty.faults().set_fail_prepare(true);
        assert!(faulty.conditional_update("k", &record, true).await.is_err());
        assert!(memory.peek("k").is_none());

        faulty.faults().set_fail_prepare(false);
        let version = faulty.conditional_update("k", &record, true).await.unwrap();

        faulty.faults().set_fail_commit(true);
        assert!(faulty.conditional_commit("k", &version, 5).await.is_err());

        faulty.faults().set_offline(true);
        let err = faulty.get_item("k").await.unwrap_err();
        assert!(matches!(err, ConnectorError::Unavailable(_)));
    }
}
