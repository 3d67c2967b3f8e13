//! Envelope carried between coordinators and executors

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An encoded request or reply plus string headers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub body: Vec<u8>,

    /// `from` names the sending node
    pub headers: HashMap<String, String>,
}

impl Message {
    pub fn new(body: Vec<u8>, headers: HashMap<String, String>) -> Self {
        Self { body, headers }
    }

    pub fn with_body(body: Vec<u8>) -> Self {
        Self {
            body,
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Message::with_body(body)
    }
}
