//! Core signaling vocabulary shared across the call stack.
//!
//! Everything that crosses the wire between two peers lives here: peer
//! identities, call identifiers, and the small set of call-setup messages.
//! Media descriptions travel inside [`SignalingMessage::Offer`] and
//! [`SignalingMessage::Answer`] as opaque strings so this crate stays free
//! of any media-layer types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a call attempt, shared by both ends.
pub type CallId = Uuid;

/// A stable peer identity on the signaling plane.
///
/// The same type names the local user (when binding) and remote parties
/// (when addressing messages). Identities are opaque strings owned by the
/// surrounding product, typically a user id from its account system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// What a call carries. `Video` always includes audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Audio,
    Video,
}

impl CallKind {
    pub fn has_video(&self) -> bool {
        matches!(self, CallKind::Video)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Audio => "audio",
            CallKind::Video => "video",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a callee turned down an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectReason {
    /// The callee is already in a call.
    Busy,
    /// The callee (or its user) declined the offer.
    Declined,
    /// The callee accepted but could not answer, e.g. its device
    /// acquisition failed after the offer was admitted.
    Error,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Busy => "busy",
            RejectReason::Declined => "declined",
            RejectReason::Error => "error",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Call-setup messages exchanged between two peers.
///
/// The `session` payloads are serialized stream descriptions produced and
/// consumed by the media layer; the signaling plane never interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Invitation to a call, carrying the caller's stream description.
    Offer {
        call_id: CallId,
        kind: CallKind,
        session: String,
    },
    /// Acceptance of an offer, carrying the callee's stream description.
    Answer { call_id: CallId, session: String },
    /// Refusal of an offer.
    Reject {
        call_id: CallId,
        reason: RejectReason,
    },
    /// Termination of a call either side knows about.
    Hangup { call_id: CallId },
}

impl SignalingMessage {
    /// Message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Reject { .. } => "reject",
            SignalingMessage::Hangup { .. } => "hangup",
        }
    }

    /// The call this message belongs to.
    pub fn call_id(&self) -> CallId {
        match self {
            SignalingMessage::Offer { call_id, .. }
            | SignalingMessage::Answer { call_id, .. }
            | SignalingMessage::Reject { call_id, .. }
            | SignalingMessage::Hangup { call_id } => *call_id,
        }
    }
}

/// An inbound message together with the peer that sent it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingEvent {
    pub from: PeerId,
    pub message: SignalingMessage,
}
