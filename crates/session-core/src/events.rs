//! Events and handler traits for UI integration.
//!
//! Two consumption styles, usable together: subscribe to the broadcast
//! event stream for reactive UI updates, and/or install a
//! [`CallEventHandler`] when the product wants to decide call admission
//! (ring screens, do-not-disturb) or react with async work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use telecare_signal_core::{CallId, CallKind, PeerId, RejectReason};

use crate::call::{CallInfo, CallState};
use crate::error::CallError;

/// Notifications emitted by the session manager.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// An inbound call arrived while idle.
    IncomingCall(IncomingCall),

    /// The call moved to a new state.
    CallStateChanged {
        call_id: CallId,
        previous: CallState,
        new_state: CallState,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// The call failed. Emitted at most once per call, before cleanup.
    CallFailed {
        call_id: CallId,
        peer: PeerId,
        error: CallError,
        timestamp: DateTime<Utc>,
    },

    /// The call is fully cleaned up; the session is idle again.
    CallEnded { info: CallInfo },

    /// An inbound call was turned away (busy, declined, or failed).
    IncomingCallRejected {
        peer: PeerId,
        reason: RejectReason,
        timestamp: DateTime<Utc>,
    },
}

/// An inbound call offer, as presented to handlers and the event stream.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub call_id: CallId,
    pub from: PeerId,
    /// Display name resolved through the contact directory, when one is
    /// configured and knows the peer.
    pub display_name: Option<String>,
    pub kind: CallKind,
    pub received_at: DateTime<Utc>,
}

/// What to do with an inbound call offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    /// Answer the call.
    Accept,
    /// Turn the call down; the caller sees a decline.
    Reject,
    /// Drop the offer without responding; the caller times out.
    Ignore,
}

/// Application hook for call events.
///
/// All methods have default implementations; implement only what the
/// product needs. Without an installed handler, inbound calls are
/// accepted automatically.
#[async_trait]
pub trait CallEventHandler: Send + Sync {
    /// Decide what happens to an inbound call.
    async fn on_incoming_call(&self, _call: IncomingCall) -> CallAction {
        CallAction::Accept
    }

    async fn on_call_state_changed(
        &self,
        _call_id: CallId,
        _previous: CallState,
        _new_state: CallState,
        _reason: Option<String>,
    ) {
    }

    async fn on_call_failed(&self, _call_id: CallId, _peer: PeerId, _error: CallError) {}

    async fn on_call_ended(&self, _info: CallInfo) {}
}

/// Lookup of human-readable names for peer identities.
pub trait ContactDirectory: Send + Sync {
    fn display_name(&self, peer: &PeerId) -> Option<String>;
}
