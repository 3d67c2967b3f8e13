//! Datastore engine for cross-backend transactions
//!
//! This crate holds the per-backend half of the protocol:
//! - [`GroupKeyMaintainer`]: lazily created, replicated transaction outcomes
//! - [`Resolver`]: the visibility processor (roll forward, rollback, lease
//!   expiry, snapshot walk), shared with the remote executor
//! - [`Datastore`]: the per-transaction engine with its read cache, write
//!   buffer and invisible set
//! - [`RemoteClient`]: the contract a thin client uses to reach executors

pub mod context;
pub mod datastore;
pub mod error;
pub mod group_key;
pub mod remote;
pub mod visibility;

pub use context::{ConcurrencyLevel, TxnContext};
pub use datastore::Datastore;
pub use error::{DatastoreError, Result};
pub use group_key::{
    ConnectorGroupKeyStore, GroupKeyCache, GroupKeyMaintainer, GroupKeyOutcome, GroupKeyStore,
};
pub use remote::RemoteClient;
pub use visibility::{Resolution, Resolver, VisibleRead};
