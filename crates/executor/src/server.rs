//! Engine-facing server loop for an executor

use crate::config::ExecutorConfig;
use crate::executor::Executor;
use crossbar_engine::Engine;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Serves one executor on one engine subject
pub struct ExecutorServer {
    subject: String,
    executor: Arc<Executor>,
    engine: Arc<Engine>,
    config: ExecutorConfig,
}

impl ExecutorServer {
    pub fn new(
        subject: impl Into<String>,
        executor: Arc<Executor>,
        engine: Arc<Engine>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            subject: subject.into(),
            executor,
            engine,
            config,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Register on the engine and handle requests until stopped.
    ///
    /// Each request runs in its own task; at most
    /// `max_concurrent_requests` run at once.
    pub fn start(&self) -> JoinHandle<()> {
        let mut requests = self.engine.register_handler(&self.subject);
        let executor = self.executor.clone();
        let limit = Arc::new(Semaphore::new(self.config.max_concurrent_requests));
        let subject = self.subject.clone();
        info!(
            "Executor for {:?} listening on {}",
            executor.backends(),
            subject
        );

        tokio::spawn(async move {
            while let Some((message, reply)) = requests.recv().await {
                let Ok(permit) = limit.clone().acquire_owned().await else {
                    break;
                };
                let executor = executor.clone();
                tokio::spawn(async move {
                    let response = executor.handle(message).await;
                    if reply.send(response).is_err() {
                        debug!("Client left before the reply was sent");
                    }
                    drop(permit);
                });
            }
            debug!("Executor on {} stopped", subject);
        })
    }

    /// Stop accepting requests
    pub fn stop(&self) {
        self.engine.unregister_handler(&self.subject);
    }
}
