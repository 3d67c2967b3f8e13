//! Transaction configuration

use crossbar_common::Codec;
use crossbar_datastore::ConcurrencyLevel;
use crossbar_record::{ReadStrategy, RecordConfig};
use std::time::Duration;

/// Settings shared by every transaction a factory creates
#[derive(Debug, Clone, Copy)]
pub struct TransactionConfig {
    /// Record layout and read behaviour
    pub record: RecordConfig,
    /// How prepare issues conditional updates within one backend
    pub concurrency: ConcurrencyLevel,
    /// Flip records to committed in a background task
    pub async_commit: bool,
    /// Cap on the number of group key replicas, `None` for one per written backend
    pub max_group_key_locations: Option<usize>,
    /// Deadline for each remote call
    pub rpc_timeout: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            record: RecordConfig::default(),
            concurrency: ConcurrencyLevel::Sequential,
            async_commit: true,
            max_group_key_locations: None,
            rpc_timeout: Duration::from_secs(5),
        }
    }
}

impl TransactionConfig {
    pub fn with_record(mut self, record: RecordConfig) -> Self {
        self.record = record;
        self
    }

    pub fn with_max_record_length(mut self, len: usize) -> Self {
        self.record = self.record.with_max_record_length(len);
        self
    }

    pub fn with_read_strategy(mut self, strategy: ReadStrategy) -> Self {
        self.record = self.record.with_read_strategy(strategy);
        self
    }

    /// Lease length in time source ticks
    pub fn with_lease_time(mut self, ticks: u64) -> Self {
        self.record = self.record.with_lease_time(ticks);
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.record = self.record.with_codec(codec);
        self
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyLevel) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_async_commit(mut self, enabled: bool) -> Self {
        self.async_commit = enabled;
        self
    }

    pub fn with_max_group_key_locations(mut self, max: usize) -> Self {
        self.max_group_key_locations = Some(max.max(1));
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn codec(&self) -> Codec {
        self.record.codec
    }
}
