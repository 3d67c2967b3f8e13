//! Client handle for the engine

use crate::{Message, Result, engine::Engine};
use std::sync::Arc;
use std::time::Duration;

/// Client for sending requests through the engine
#[derive(Clone)]
pub struct EngineClient {
    /// Node ID
    node_id: String,

    /// Reference to the engine
    engine: Arc<Engine>,
}

impl EngineClient {
    /// Create a new client
    pub fn new(node_id: impl Into<String>, engine: Arc<Engine>) -> Self {
        Self {
            node_id: node_id.into(),
            engine,
        }
    }

    /// Get the node ID of this client
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Send a request and wait for a reply
    pub async fn request(
        &self,
        subject: &str,
        message: impl Into<Message>,
        timeout: Duration,
    ) -> Result<Message> {
        let message = message.into().with_header("from", self.node_id.clone());
        self.engine.request(subject, message, timeout).await
    }

    /// Check if there is a handler for a subject
    pub fn has_responders(&self, subject: &str) -> bool {
        self.engine.has_responders(subject)
    }
}
