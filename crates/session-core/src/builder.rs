//! Builder for [`CallSessionManager`].

use std::sync::Arc;
use std::time::Duration;

use telecare_media_core::CaptureDevice;
use telecare_signal_core::{PeerId, SignalingTransport};

use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::events::ContactDirectory;
use crate::manager::CallSessionManager;
use crate::retry::RetryConfig;

/// Fluent builder for a [`CallSessionManager`].
///
/// A transport and a capture device are required; everything else has
/// sensible defaults.
///
/// ```rust,no_run
/// use telecare_session_core::{CallManagerBuilder, MemorySignalingHub, MockCaptureDevice};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hub = MemorySignalingHub::new();
/// let manager = CallManagerBuilder::new("alice")
///     .with_transport(hub)
///     .with_capture(Arc::new(MockCaptureDevice::new()))
///     .build()?;
/// manager.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct CallManagerBuilder {
    identity: PeerId,
    config: CallConfig,
    transport: Option<Arc<dyn SignalingTransport>>,
    capture: Option<Arc<dyn CaptureDevice>>,
    contacts: Option<Arc<dyn ContactDirectory>>,
}

impl CallManagerBuilder {
    /// Start building a manager bound to the given identity.
    pub fn new(identity: impl Into<PeerId>) -> Self {
        Self {
            identity: identity.into(),
            config: CallConfig::default(),
            transport: None,
            capture: None,
            contacts: None,
        }
    }

    /// Set the signaling transport (required).
    pub fn with_transport(mut self, transport: Arc<dyn SignalingTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the capture device used for local media (required).
    pub fn with_capture(mut self, capture: Arc<dyn CaptureDevice>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Set a directory used to resolve display names for inbound calls.
    pub fn with_contacts(mut self, contacts: Arc<dyn ContactDirectory>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    /// Override how long negotiation may run before the call is failed.
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.config.negotiation_timeout = timeout;
        self
    }

    /// Override the retry policy for binding the signaling identity.
    pub fn with_bind_retry(mut self, retry: RetryConfig) -> Self {
        self.config.bind_retry = retry;
        self
    }

    /// Build the manager.
    ///
    /// Returns [`CallError::InvalidConfiguration`] when a required piece is
    /// missing. Does not touch the network; call
    /// [`CallSessionManager::start`] afterwards.
    pub fn build(self) -> CallResult<Arc<CallSessionManager>> {
        let transport = self.transport.ok_or_else(|| {
            CallError::invalid_configuration("transport", "a signaling transport is required")
        })?;
        let capture = self.capture.ok_or_else(|| {
            CallError::invalid_configuration("capture", "a capture device is required")
        })?;

        Ok(CallSessionManager::new(
            self.identity,
            self.config,
            transport,
            capture,
            self.contacts,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telecare_media_core::MockCaptureDevice;
    use telecare_signal_core::MemorySignalingHub;

    #[test]
    fn test_build_requires_transport() {
        let err = CallManagerBuilder::new("alice")
            .with_capture(Arc::new(MockCaptureDevice::new()))
            .build()
            .map(|_| ())
            .expect_err("missing transport should be rejected");
        assert!(matches!(
            err,
            CallError::InvalidConfiguration { ref field, .. } if field == "transport"
        ));
    }

    #[test]
    fn test_build_requires_capture() {
        let err = CallManagerBuilder::new("alice")
            .with_transport(MemorySignalingHub::new())
            .build()
            .map(|_| ())
            .expect_err("missing capture should be rejected");
        assert!(matches!(
            err,
            CallError::InvalidConfiguration { ref field, .. } if field == "capture"
        ));
    }

    #[test]
    fn test_build_with_defaults() {
        let manager = CallManagerBuilder::new("alice")
            .with_transport(MemorySignalingHub::new())
            .with_capture(Arc::new(MockCaptureDevice::new()))
            .with_negotiation_timeout(Duration::from_secs(10))
            .build()
            .expect("complete builder should succeed");
        assert_eq!(manager.identity().as_str(), "alice");
        assert!(!manager.is_running());
    }
}
