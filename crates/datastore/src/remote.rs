//! Client side of the remote protocol

use crate::error::Result;
use async_trait::async_trait;
use crossbar_common::Codec;
use crossbar_protocol::{CommitInfo, PrepareReply, PrepareRequest, ReadReply};
use crossbar_record::RecordConfig;

/// The one boundary a transaction crosses when it runs remotely.
///
/// Implementations route each call to an executor serving `backend`.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Visibility-processed read of `key` as of `start_time`
    async fn read(
        &self,
        backend: &str,
        key: &str,
        start_time: u64,
        config: &RecordConfig,
    ) -> Result<ReadReply>;

    /// Validate speculative reads, then conditionally write the request's
    /// items as prepared
    async fn prepare(&self, request: PrepareRequest) -> Result<PrepareReply>;

    /// Flip prepared records to committed at `t_commit`
    async fn commit(&self, backend: &str, items: Vec<CommitInfo>, t_commit: u64) -> Result<()>;

    /// Roll back the keys still owned by `group_key_list`
    async fn abort(
        &self,
        backend: &str,
        keys: Vec<String>,
        group_key_list: &str,
        codec: Codec,
    ) -> Result<()>;
}
