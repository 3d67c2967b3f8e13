//! Executor configuration

/// Settings for an executor server
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Requests handled at the same time; the rest wait in the queue
    pub max_concurrent_requests: usize,
    /// Decided group key outcomes kept in memory
    pub group_key_cache: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 256,
            group_key_cache: 10_000,
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit.max(1);
        self
    }

    pub fn with_group_key_cache(mut self, capacity: usize) -> Self {
        self.group_key_cache = capacity;
        self
    }
}
