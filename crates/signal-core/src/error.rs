//! Error types for signaling operations.

use thiserror::Error;

/// Result type for signaling operations.
pub type SignalResult<T> = Result<T, SignalError>;

/// Errors produced by the signaling plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// Another session already holds this identity on the relay.
    #[error("Identity unavailable: {identity} is already bound")]
    IdentityUnavailable { identity: String },

    /// This binder already holds a live channel.
    #[error("Already bound as {identity}")]
    AlreadyBound { identity: String },

    /// The channel was closed before or during the operation.
    #[error("Signaling channel is closed")]
    ChannelClosed,

    /// Transport-level failure on the channel.
    #[error("Signaling channel error: {reason}")]
    ChannelError { reason: String },

    /// The destination peer is not reachable on the relay.
    #[error("Peer unreachable: {peer}")]
    PeerUnreachable { peer: String },
}

impl SignalError {
    pub fn identity_unavailable(identity: impl Into<String>) -> Self {
        Self::IdentityUnavailable {
            identity: identity.into(),
        }
    }

    pub fn already_bound(identity: impl Into<String>) -> Self {
        Self::AlreadyBound {
            identity: identity.into(),
        }
    }

    pub fn channel_error(reason: impl Into<String>) -> Self {
        Self::ChannelError {
            reason: reason.into(),
        }
    }

    pub fn peer_unreachable(peer: impl Into<String>) -> Self {
        Self::PeerUnreachable { peer: peer.into() }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Transient transport trouble is worth retrying; a taken identity or a
    /// closed channel is not going to change by itself.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SignalError::ChannelError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        assert!(SignalError::channel_error("socket reset").is_recoverable());
        assert!(!SignalError::identity_unavailable("dr-lee").is_recoverable());
        assert!(!SignalError::ChannelClosed.is_recoverable());
        assert!(!SignalError::peer_unreachable("dr-lee").is_recoverable());
    }
}
