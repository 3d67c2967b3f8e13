//! Remote execution of the transaction protocol
//!
//! An [`Executor`] runs read, prepare, commit and abort for the backends it
//! holds connectors for, plus group key access for locations on those
//! backends. [`ExecutorServer`] exposes it on an engine subject, and
//! [`ExecutorClient`] is the thin client a remote transaction talks to.

pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod server;
pub mod store;

pub use client::ExecutorClient;
pub use config::ExecutorConfig;
pub use error::{ExecutorError, Result};
pub use executor::Executor;
pub use server::ExecutorServer;
pub use store::RoutedGroupKeyStore;
