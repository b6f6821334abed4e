//! In-process signaling hub.
//!
//! Routes messages between identities bound on the same hub instance. This
//! is the transport used by the test suites and the loopback example; a
//! deployment against a real relay service implements the same traits over
//! its network protocol.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{SignalError, SignalResult};
use crate::transport::{ChannelBinding, SignalingChannel, SignalingTransport};
use crate::types::{PeerId, SignalingEvent, SignalingMessage};

type PeerTable = Arc<DashMap<PeerId, mpsc::UnboundedSender<SignalingEvent>>>;

/// Shared in-memory relay. Clone the `Arc` into every participant.
pub struct MemorySignalingHub {
    peers: PeerTable,
}

impl MemorySignalingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: Arc::new(DashMap::new()),
        })
    }

    /// Whether an identity currently holds a channel on this hub.
    pub fn is_bound(&self, identity: &PeerId) -> bool {
        self.peers.contains_key(identity)
    }

    pub fn bound_count(&self) -> usize {
        self.peers.len()
    }
}

#[async_trait]
impl SignalingTransport for MemorySignalingHub {
    async fn bind(&self, identity: &PeerId) -> SignalResult<ChannelBinding> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.peers.entry(identity.clone()) {
            Entry::Occupied(_) => {
                return Err(SignalError::identity_unavailable(identity.as_str()));
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        debug!(identity = %identity, "identity registered on hub");

        let channel = Arc::new(MemoryChannel {
            peers: self.peers.clone(),
            identity: identity.clone(),
            closed: AtomicBool::new(false),
        });
        Ok(ChannelBinding {
            channel,
            events: rx,
        })
    }
}

/// One bound identity's channel on a [`MemorySignalingHub`].
pub struct MemoryChannel {
    peers: PeerTable,
    identity: PeerId,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn close_now(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.peers.remove(&self.identity);
            debug!(identity = %self.identity, "identity released from hub");
        }
    }
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    fn identity(&self) -> &PeerId {
        &self.identity
    }

    async fn send(&self, to: &PeerId, message: SignalingMessage) -> SignalResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalError::ChannelClosed);
        }
        let Some(entry) = self.peers.get(to) else {
            return Err(SignalError::peer_unreachable(to.as_str()));
        };
        debug!(
            from = %self.identity,
            to = %to,
            message = message.name(),
            "routing signaling message"
        );
        entry
            .value()
            .send(SignalingEvent {
                from: self.identity.clone(),
                message,
            })
            .map_err(|_| SignalError::peer_unreachable(to.as_str()))
    }

    async fn close(&self) -> SignalResult<()> {
        self.close_now();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// Backstop for channels dropped without an explicit close; keeps the
// identity reusable on the hub.
impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.close_now();
    }
}
