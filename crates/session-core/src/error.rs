//! Error types for call session operations.
//!
//! Every failure a UI can observe funnels into [`CallError`]. The variants
//! mirror how they should be presented: `is_recoverable` says whether a
//! retry makes sense, `category` groups them for logging and metrics.

use thiserror::Error;

use telecare_media_core::MediaError;
use telecare_signal_core::SignalError;

/// Result type for call session operations.
pub type CallResult<T> = Result<T, CallError>;

/// Errors produced by the call session layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Operation requires a started session manager.
    #[error("Session manager is not started")]
    NotStarted,

    /// The manager was assembled with an unusable configuration.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Another session already holds the local identity on the relay.
    #[error("Identity unavailable: {identity} is already bound")]
    IdentityUnavailable { identity: String },

    /// Transport-level failure on the signaling channel.
    #[error("Signaling channel error: {reason}")]
    ChannelError { reason: String },

    /// The user or platform refused access to a capture device.
    #[error("Device access denied: {reason}")]
    DeviceDenied { reason: String },

    /// A required capture device does not exist or cannot be opened.
    #[error("Device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    /// The call-setup handshake failed.
    #[error("Call negotiation failed: {reason}")]
    NegotiationError { reason: String },

    /// The remote party never answered within the configured window.
    #[error("Call negotiation timed out after {duration_ms}ms")]
    NegotiationTimeout { duration_ms: u64 },

    /// A call request while another call is already in progress. The
    /// request is rejected; the existing call is untouched.
    #[error("Another call is already in progress")]
    SessionBusy,

    /// The remote party is occupied in another call.
    #[error("{peer} is busy")]
    Busy { peer: String },

    /// The remote party declined the call.
    #[error("{peer} declined the call")]
    CallDeclined { peer: String },

    /// A bug or impossible condition inside the session layer.
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl CallError {
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn channel_error(reason: impl Into<String>) -> Self {
        Self::ChannelError {
            reason: reason.into(),
        }
    }

    pub fn negotiation_error(reason: impl Into<String>) -> Self {
        Self::NegotiationError {
            reason: reason.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation can reasonably succeed.
    ///
    /// Device errors clear once the user grants permission, negotiation
    /// errors once the network or the remote party behaves, and a busy
    /// remote may pick up later. A taken identity or a declined call will
    /// not change by retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CallError::ChannelError { .. }
                | CallError::DeviceDenied { .. }
                | CallError::DeviceUnavailable { .. }
                | CallError::NegotiationError { .. }
                | CallError::NegotiationTimeout { .. }
                | CallError::Busy { .. }
        )
    }

    /// Coarse grouping for logs and user-facing routing.
    pub fn category(&self) -> &'static str {
        match self {
            CallError::NotStarted | CallError::InvalidConfiguration { .. } => "client",
            CallError::IdentityUnavailable { .. } | CallError::ChannelError { .. } => "signaling",
            CallError::DeviceDenied { .. } | CallError::DeviceUnavailable { .. } => "media",
            CallError::NegotiationError { .. } | CallError::NegotiationTimeout { .. } => {
                "negotiation"
            }
            CallError::SessionBusy | CallError::Busy { .. } | CallError::CallDeclined { .. } => {
                "session"
            }
            CallError::InternalError { .. } => "internal",
        }
    }
}

impl From<SignalError> for CallError {
    fn from(e: SignalError) -> Self {
        match e {
            SignalError::IdentityUnavailable { identity } => {
                CallError::IdentityUnavailable { identity }
            }
            SignalError::AlreadyBound { identity } => CallError::InternalError {
                message: format!("already bound as {identity}"),
            },
            SignalError::ChannelClosed => CallError::channel_error("channel closed"),
            SignalError::ChannelError { reason } => CallError::ChannelError { reason },
            SignalError::PeerUnreachable { peer } => {
                CallError::negotiation_error(format!("peer {peer} unreachable"))
            }
        }
    }
}

impl From<MediaError> for CallError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::DeviceDenied { reason } => CallError::DeviceDenied { reason },
            MediaError::DeviceUnavailable { reason } => CallError::DeviceUnavailable { reason },
        }
    }
}
