//! Lifecycle states shared by transactions, records and group keys

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a transaction, a versioned record, or a group key
///
/// Records only ever hold `Prepared` or `Committed`; group keys only hold
/// `Committed` or `Aborted`. Transactions walk
/// `Empty -> Started -> Committed | Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TxnState {
    #[default]
    Empty,
    Started,
    Prepared,
    Committed,
    Aborted,
}

impl TxnState {
    /// Whether this state is a final outcome
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnState::Empty => "empty",
            TxnState::Started => "started",
            TxnState::Prepared => "prepared",
            TxnState::Committed => "committed",
            TxnState::Aborted => "aborted",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "empty" => Some(TxnState::Empty),
            "started" => Some(TxnState::Started),
            "prepared" => Some(TxnState::Prepared),
            "committed" => Some(TxnState::Committed),
            "aborted" => Some(TxnState::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
