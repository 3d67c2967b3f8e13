//! In-process request/reply bus
//!
//! Servers register a handler per subject and receive each request together
//! with a one-shot reply channel. Callers wait for the reply with a deadline.

use crate::{EngineError, Message, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// A request paired with the channel its reply goes back on
pub type Request = (Message, oneshot::Sender<Message>);

/// Type alias for request handler channels
type RequestHandler = mpsc::UnboundedSender<Request>;

/// Request/reply engine shared by servers and clients
pub struct Engine {
    handlers: Arc<Mutex<HashMap<String, RequestHandler>>>,
}

impl Engine {
    /// Create a new engine with no handlers
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a request handler for a subject, replacing any previous one
    pub fn register_handler(&self, subject: &str) -> mpsc::UnboundedReceiver<Request> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handlers.lock().insert(subject.to_string(), tx);
        debug!("Registered handler for {}", subject);
        rx
    }

    /// Remove the handler for a subject
    pub fn unregister_handler(&self, subject: &str) {
        self.handlers.lock().remove(subject);
    }

    /// Whether a live handler is registered for the subject
    pub fn has_responders(&self, subject: &str) -> bool {
        self.handlers
            .lock()
            .get(subject)
            .is_some_and(|handler| !handler.is_closed())
    }

    /// Send a request and wait for reply
    pub async fn request(&self, subject: &str, message: Message, timeout: Duration) -> Result<Message> {
        let reply_rx = {
            let handlers = self.handlers.lock();
            let handler = handlers
                .get(subject)
                .ok_or_else(|| EngineError::NoResponders(subject.to_string()))?;

            let (reply_tx, reply_rx) = oneshot::channel();
            if handler.send((message, reply_tx)).is_err() {
                return Err(EngineError::ChannelClosed);
            }
            reply_rx
        };

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(EngineError::ChannelClosed),
            Err(_) => Err(EngineError::Timeout(subject.to_string())),
        }
    }

    /// Drop handlers whose receivers are gone
    pub fn cleanup(&self) {
        self.handlers.lock().retain(|_, h| !h.is_closed());
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
