//! Cross-backend transactions
//!
//! A [`Transaction`] reads and writes keys on several independent backends
//! and commits them atomically. There is no central log: each transaction's
//! outcome is a small group key record that any reader can consult to resolve
//! a record the transaction left prepared.
//!
//! Transactions come from a [`TransactionFactory`], either over local
//! connectors or over remote executors.

pub mod config;
pub mod error;
pub mod factory;
pub mod transaction;

pub use config::TransactionConfig;
pub use error::{Result, TransactionError};
pub use factory::TransactionFactory;
pub use transaction::Transaction;
