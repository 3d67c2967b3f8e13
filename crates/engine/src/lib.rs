//! In-process message engine
//!
//! Carries remote-protocol requests between transaction clients and
//! executor servers. Every request has an explicit deadline.

use thiserror::Error;

pub mod client;
pub mod engine;
pub mod message;

pub use client::EngineClient;
pub use engine::{Engine, Request};
pub use message::Message;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No responders for subject: {0}")]
    NoResponders(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_request_reply() {
        let engine = Arc::new(Engine::new());
        let client = EngineClient::new("test-node", engine.clone());

        let mut handler = engine.register_handler("echo");
        tokio::spawn(async move {
            while let Some((msg, reply_tx)) = handler.recv().await {
                let reply = Message::with_body(msg.body.clone())
                    .with_header("from", msg.header("from").unwrap_or_default());
                let _ = reply_tx.send(reply);
            }
        });

        let reply = client
            .request("echo", b"ping".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(reply.body, b"ping");
        assert_eq!(reply.header("from"), Some("test-node"));
    }

    #[tokio::test]
    async fn test_no_responders() {
        let engine = Arc::new(Engine::new());
        let client = EngineClient::new("test-node", engine);

        let err = client
            .request("nobody", Message::default(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoResponders(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let engine = Arc::new(Engine::new());
        let client = EngineClient::new("test-node", engine.clone());

        // Hold requests without ever replying
        let mut handler = engine.register_handler("slow");
        let held = tokio::spawn(async move {
            let mut pending = Vec::new();
            while let Some(request) = handler.recv().await {
                pending.push(request);
            }
        });

        let err = client
            .request("slow", Message::default(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
        held.abort();
    }

    #[tokio::test]
    async fn test_dropped_reply_is_channel_closed() {
        let engine = Arc::new(Engine::new());
        let mut handler = engine.register_handler("drop");
        tokio::spawn(async move {
            while let Some((_msg, reply_tx)) = handler.recv().await {
                drop(reply_tx);
            }
        });

        let err = engine
            .request("drop", Message::default(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_cleanup_removes_closed_handlers() {
        let engine = Engine::new();
        let handler = engine.register_handler("gone");
        assert!(engine.has_responders("gone"));
        drop(handler);
        assert!(!engine.has_responders("gone"));
        engine.cleanup();
        assert!(matches!(
            engine
                .request("gone", Message::default(), Duration::from_millis(5))
                .await,
            Err(EngineError::NoResponders(_))
        ));
    }
}
