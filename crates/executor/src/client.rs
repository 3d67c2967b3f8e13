//! Thin client for remote executors
//!
//! Embeds no backend driver: every call becomes a request to an executor
//! serving the target backend. A backend may be served by several
//! executors, which are used round-robin.

use async_trait::async_trait;
use crossbar_common::Codec;
use crossbar_datastore::{DatastoreError, GroupKeyStore, RemoteClient, Result};
use crossbar_engine::EngineClient;
use crossbar_protocol::{
    AbortRequest, CommitInfo, CommitRequest, ExecutorRequest, ExecutorResponse, GroupKeyReply,
    GroupKeyRequest, PrepareReply, PrepareRequest, ReadReply, ReadRequest, ResponseStatus,
};
use crossbar_record::{GroupKeyItem, GroupKeyLocation, RecordConfig};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::error;

/// Client side of the remote protocol
pub struct ExecutorClient {
    client: EngineClient,
    routes: HashMap<String, Vec<String>>,
    next: AtomicUsize,
    timeout: Duration,
}

impl ExecutorClient {
    pub fn new(client: EngineClient, timeout: Duration) -> Self {
        Self {
            client,
            routes: HashMap::new(),
            next: AtomicUsize::new(0),
            timeout,
        }
    }

    /// Add an executor subject serving `backend`
    pub fn with_route(mut self, backend: impl Into<String>, subject: impl Into<String>) -> Self {
        self.routes
            .entry(backend.into())
            .or_default()
            .push(subject.into());
        self
    }

    /// Backends with at least one route, sorted
    pub fn backends(&self) -> Vec<String> {
        let mut backends: Vec<String> = self.routes.keys().cloned().collect();
        backends.sort();
        backends
    }

    fn subject(&self, backend: &str) -> Result<&str> {
        let subjects = self
            .routes
            .get(backend)
            .filter(|subjects| !subjects.is_empty())
            .ok_or_else(|| DatastoreError::Remote(format!("no executor serves {}", backend)))?;
        let index = self.next.fetch_add(1, Ordering::Relaxed) % subjects.len();
        Ok(subjects[index].as_str())
    }

    async fn call<T: DeserializeOwned>(&self, backend: &str, request: ExecutorRequest) -> Result<T> {
        let subject = self.subject(backend)?;
        let message = request
            .into_message()
            .map_err(|e| DatastoreError::Serialize(e.to_string()))?;

        let reply = self
            .client
            .request(subject, message, self.timeout)
            .await
            .map_err(|e| {
                error!("Request to executor {} failed: {}", subject, e);
                DatastoreError::Remote(e.to_string())
            })?;

        let response = ExecutorResponse::from_message(reply)
            .map_err(|e| DatastoreError::Deserialize(e.to_string()))?;
        match &response.status {
            ResponseStatus::Ok => response
                .payload()
                .map_err(|e| DatastoreError::Deserialize(e.to_string())),
            ResponseStatus::Error { kind, message } => {
                Err(DatastoreError::from_remote(*kind, message.clone()))
            }
        }
    }
}

#[async_trait]
impl RemoteClient for ExecutorClient {
    async fn read(
        &self,
        backend: &str,
        key: &str,
        start_time: u64,
        config: &RecordConfig,
    ) -> Result<ReadReply> {
        let request = ReadRequest {
            backend: backend.to_string(),
            key: key.to_string(),
            start_time,
            config: *config,
        };
        self.call(backend, ExecutorRequest::Read(request)).await
    }

    async fn prepare(&self, request: PrepareRequest) -> Result<PrepareReply> {
        let backend = request.backend.clone();
        self.call(&backend, ExecutorRequest::Prepare(request)).await
    }

    async fn commit(&self, backend: &str, items: Vec<CommitInfo>, t_commit: u64) -> Result<()> {
        let request = CommitRequest {
            backend: backend.to_string(),
            items,
            t_commit,
        };
        self.call(backend, ExecutorRequest::Commit(request)).await
    }

    async fn abort(
        &self,
        backend: &str,
        keys: Vec<String>,
        group_key_list: &str,
        codec: Codec,
    ) -> Result<()> {
        let request = AbortRequest {
            backend: backend.to_string(),
            keys,
            group_key_list: group_key_list.to_string(),
            codec,
        };
        self.call(backend, ExecutorRequest::Abort(request)).await
    }
}

#[async_trait]
impl GroupKeyStore for ExecutorClient {
    async fn create(
        &self,
        location: &GroupKeyLocation,
        item: &GroupKeyItem,
    ) -> Result<GroupKeyItem> {
        let request = GroupKeyRequest {
            location: location.clone(),
            item: Some(*item),
        };
        let reply: GroupKeyReply = self
            .call(&location.backend, ExecutorRequest::GroupKeyCreate(request))
            .await?;
        reply
            .item
            .ok_or_else(|| DatastoreError::GroupKey(format!("no decision returned by {}", location)))
    }

    async fn read(&self, location: &GroupKeyLocation) -> Result<Option<GroupKeyItem>> {
        let request = GroupKeyRequest {
            location: location.clone(),
            item: None,
        };
        let reply: GroupKeyReply = self
            .call(&location.backend, ExecutorRequest::GroupKeyRead(request))
            .await?;
        Ok(reply.item)
    }

    async fn delete(&self, location: &GroupKeyLocation) -> Result<()> {
        let request = GroupKeyRequest {
            location: location.clone(),
            item: None,
        };
        self.call(&location.backend, ExecutorRequest::GroupKeyDelete(request))
            .await
    }
}
