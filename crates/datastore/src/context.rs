//! Transaction-scoped settings handed to every datastore engine

use crate::group_key::GroupKeyMaintainer;
use crossbar_clock::SharedTimeSource;
use crossbar_common::TransactionId;
pub use crossbar_record::ConcurrencyLevel;
use crossbar_record::RecordConfig;
use std::sync::Arc;

/// Everything a datastore engine needs to know about its transaction
pub struct TxnContext {
    pub txn_id: TransactionId,
    pub start_time: u64,
    pub config: RecordConfig,
    pub concurrency: ConcurrencyLevel,
    pub time_source: SharedTimeSource,
    pub group_keys: Arc<GroupKeyMaintainer>,
}
