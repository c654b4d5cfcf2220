//! Executor configuration.

use kumiki_core::EngineError;
use std::time::Duration;

/// Settings for the [`Executor`](crate::Executor) polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of task updates taken per poll.
    pub batch_size: usize,
    /// How long a poll waits for updates before returning an empty batch.
    pub poll_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            poll_timeout: Duration::from_millis(100),
        }
    }
}

impl ExecutorConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Rejects a zero batch size.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.batch_size == 0 {
            return Err(EngineError::Validation(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
