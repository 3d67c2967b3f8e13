//! Record configuration

use crossbar_common::Codec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a reader treats a PREPARED record whose outcome cannot be resolved yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReadStrategy {
    /// Refuse the read
    #[default]
    Pessimistic,
    /// Read the prepared value and validate the assumption before commit
    AssumeCommit,
    /// Read the previous value and validate the assumption before commit
    AssumeAbort,
}

/// How prepare issues conditional updates within one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConcurrencyLevel {
    /// One item at a time in key order
    #[default]
    Sequential,
    /// All items at once
    Parallel,
}

impl ReadStrategy {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadStrategy::Pessimistic => "pessimistic",
            ReadStrategy::AssumeCommit => "assume_commit",
            ReadStrategy::AssumeAbort => "assume_abort",
        }
    }
}

impl fmt::Display for ReadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-record protocol settings
///
/// Travels inside every remote request since executors keep no session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordConfig {
    /// Maximum number of versions kept in a record's chain
    pub max_record_length: usize,

    /// Strategy for unresolved prepared records
    pub read_strategy: ReadStrategy,

    /// Lease length in ticks (microseconds)
    pub lease_time: u64,

    /// Codec for values and chain snapshots
    pub codec: Codec,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            max_record_length: 2,
            read_strategy: ReadStrategy::Pessimistic,
            lease_time: 1_000_000, // 1 second
            codec: Codec::Json,
        }
    }
}

impl RecordConfig {
    /// Set maximum chain length; values below 1 are raised to 1
    pub fn with_max_record_length(mut self, len: usize) -> Self {
        self.max_record_length = len.max(1);
        self
    }

    /// Set read strategy
    pub fn with_read_strategy(mut self, strategy: ReadStrategy) -> Self {
        self.read_strategy = strategy;
        self
    }

    /// Set lease time in ticks
    pub fn with_lease_time(mut self, ticks: u64) -> Self {
        self.lease_time = ticks;
        self
    }

    /// Set codec
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
}
