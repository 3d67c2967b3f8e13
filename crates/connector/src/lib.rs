//! Backend connector contract
//!
//! A connector is the only thing a backend has to provide: single-key reads
//! and writes of [`VersionedRecord`]s guarded by a CAS version token, plus a
//! small string namespace with atomic create for group keys.
//!
//! [`MemoryConnector`] is the in-process backend used by tests and demos.
//! [`FaultyConnector`] wraps any connector and injects failures on demand.

pub mod error;
pub mod faulty;
pub mod memory;

pub use error::{ConnectorError, Result};
pub use faulty::{FaultyConnector, Faults};
pub use memory::MemoryConnector;

use async_trait::async_trait;
use crossbar_record::VersionedRecord;
use std::sync::Arc;

/// Capability set every backend implements
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish the backend connection. Calling twice is harmless.
    async fn connect(&self) -> Result<()>;

    /// Fetch the stored record for `key`
    async fn get_item(&self, key: &str) -> Result<VersionedRecord>;

    /// Store `record` only if the stored version equals `record.version`.
    ///
    /// With `do_create` the key must not exist yet and `KeyExists` is
    /// returned otherwise. Returns the new version token.
    async fn conditional_update(
        &self,
        key: &str,
        record: &VersionedRecord,
        do_create: bool,
    ) -> Result<String>;

    /// Mark the stored record committed at `t_commit` if its version is still `version`
    async fn conditional_commit(&self, key: &str, version: &str, t_commit: u64) -> Result<String>;

    /// Read a metadata value
    async fn get(&self, name: &str) -> Result<String>;

    /// Write a metadata value
    async fn put(&self, name: &str, value: &str) -> Result<()>;

    /// Delete a metadata value; deleting a missing name is not an error
    async fn delete(&self, name: &str) -> Result<()>;

    /// Create a metadata value only if absent.
    ///
    /// Losing writers get `KeyExists` carrying the stored value.
    async fn atomic_create(&self, name: &str, value: &str) -> Result<()>;
}

/// Shared handle to a connector
pub type SharedConnector = Arc<dyn Connector>;
