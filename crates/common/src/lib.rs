//! Common types for Crossbar
//!
//! This crate defines:
//! - Transaction IDs (UUIDv7-based)
//! - The lifecycle state shared by transactions, records and group keys
//! - The value codec used for payloads and version-chain snapshots

mod codec;
mod state;
mod transaction_id;

pub use codec::{Codec, CodecError};
pub use state::TxnState;
pub use transaction_id::TransactionId;
