//! Session manager configuration.

use std::time::Duration;

use crate::retry::RetryConfig;

/// Tuning knobs for a [`crate::CallSessionManager`].
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// How long a call may sit in negotiation before it fails with a
    /// timeout instead of hanging forever.
    pub negotiation_timeout: Duration,
    /// Retry policy for binding the signaling identity on start.
    pub bind_retry: RetryConfig,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(30),
            bind_retry: RetryConfig::default(),
            event_capacity: 256,
        }
    }
}

impl CallConfig {
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn with_bind_retry(mut self, retry: RetryConfig) -> Self {
        self.bind_retry = retry;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
