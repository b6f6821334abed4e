//! Transport abstraction for the signaling plane.
//!
//! A [`SignalingTransport`] turns an identity into a live [`SignalingChannel`]
//! plus a stream of inbound events. Any relay that can register an identity
//! string and route small messages between identities can implement these
//! traits; [`crate::memory::MemorySignalingHub`] is the in-process one used
//! by tests and demos.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::SignalResult;
use crate::types::{PeerId, SignalingEvent, SignalingMessage};

/// A successful bind: the channel to send on, and the inbound event stream.
pub struct ChannelBinding {
    pub channel: Arc<dyn SignalingChannel>,
    pub events: mpsc::UnboundedReceiver<SignalingEvent>,
}

/// Factory for signaling channels.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Register `identity` with the relay and open a channel for it.
    ///
    /// Fails with [`crate::SignalError::IdentityUnavailable`] if another
    /// session already holds the identity.
    async fn bind(&self, identity: &PeerId) -> SignalResult<ChannelBinding>;
}

/// A live, bound connection to the relay.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// The identity this channel is bound to.
    fn identity(&self) -> &PeerId;

    /// Send a call-setup message to another peer.
    async fn send(&self, to: &PeerId, message: SignalingMessage) -> SignalResult<()>;

    /// Close the channel and release the identity. Idempotent.
    async fn close(&self) -> SignalResult<()>;

    fn is_closed(&self) -> bool;
}
