//! Versioned record model
//!
//! This crate provides the storage representation shared by every backend:
//! - [`VersionedRecord`] with its bounded, self-contained version chain
//! - [`GroupKeyItem`] and [`GroupKeyLocation`] for transaction outcomes
//! - [`RecordConfig`] carrying chain length, read strategy and lease time

pub mod config;
pub mod error;
pub mod group_key;
pub mod record;

pub use config::{ConcurrencyLevel, ReadStrategy, RecordConfig};
pub use error::{RecordError, Result};
pub use group_key::{GroupKeyItem, GroupKeyLocation};
pub use record::VersionedRecord;
