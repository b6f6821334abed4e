//! Binds the local identity to a signaling channel.
//!
//! A [`SessionBinder`] owns at most one live channel for the lifetime of a
//! session: `bind` registers the identity and hands back the inbound event
//! stream, `unbind` releases everything and may be called any number of
//! times from any state.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{SignalError, SignalResult};
use crate::transport::{SignalingChannel, SignalingTransport};
use crate::types::{PeerId, SignalingEvent};

/// Owns the one identity-to-channel binding of a running session.
pub struct SessionBinder {
    transport: Arc<dyn SignalingTransport>,
    channel: Mutex<Option<Arc<dyn SignalingChannel>>>,
}

impl SessionBinder {
    pub fn new(transport: Arc<dyn SignalingTransport>) -> Self {
        Self {
            transport,
            channel: Mutex::new(None),
        }
    }

    /// Register `identity` with the relay and keep the resulting channel.
    ///
    /// Returns the inbound event stream for the identity. Fails with
    /// [`SignalError::AlreadyBound`] if this binder already holds a channel
    /// and [`SignalError::IdentityUnavailable`] if the relay refuses the
    /// identity.
    pub async fn bind(
        &self,
        identity: &PeerId,
    ) -> SignalResult<mpsc::UnboundedReceiver<SignalingEvent>> {
        if self.channel.lock().is_some() {
            return Err(SignalError::already_bound(identity.as_str()));
        }

        let binding = self.transport.bind(identity).await?;

        let raced = {
            let mut guard = self.channel.lock();
            if guard.is_some() {
                true
            } else {
                *guard = Some(binding.channel.clone());
                false
            }
        };
        if raced {
            // Lost a concurrent bind; release the extra channel.
            if let Err(e) = binding.channel.close().await {
                warn!(identity = %identity, error = %e, "failed to close extra channel");
            }
            return Err(SignalError::already_bound(identity.as_str()));
        }

        info!(identity = %identity, "signaling identity bound");
        Ok(binding.events)
    }

    /// Close the channel and release the identity. Idempotent.
    pub async fn unbind(&self) {
        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            let identity = channel.identity().clone();
            if let Err(e) = channel.close().await {
                warn!(identity = %identity, error = %e, "error closing signaling channel");
            }
            info!(identity = %identity, "signaling identity unbound");
        }
    }

    /// The current channel, if bound.
    pub fn channel(&self) -> Option<Arc<dyn SignalingChannel>> {
        self.channel.lock().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.channel.lock().is_some()
    }
}
