//! Call state machine and per-call records.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use telecare_media_core::MediaStreamHandle;
use telecare_signal_core::{CallId, CallKind, PeerId};

use crate::error::CallError;

/// Where the session is in a call's life.
///
/// `Idle` means no call exists. A call enters through `RequestingMedia`
/// (device acquisition), negotiates, goes active, and always leaves through
/// `Terminating`, which runs the one cleanup path. `Failed` is the terminal
/// mark for error exits; cleanup still runs via `Terminating` afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// No call in progress.
    Idle,
    /// Acquiring local capture devices.
    RequestingMedia,
    /// Offer sent or answer pending; waiting for the remote stream.
    Negotiating,
    /// Both streams live.
    Active,
    /// Cleanup in progress.
    Terminating,
    /// The call failed; cleanup follows.
    Failed,
}

impl CallState {
    /// Call setup is underway but not yet live.
    pub fn is_connecting(&self) -> bool {
        matches!(self, CallState::RequestingMedia | CallState::Negotiating)
    }

    /// The call is live.
    pub fn is_connected(&self) -> bool {
        matches!(self, CallState::Active)
    }

    /// A call exists, in whatever phase.
    pub fn is_in_call(&self) -> bool {
        !matches!(self, CallState::Idle)
    }

    /// Whether `next` is a legal successor of this state.
    ///
    /// This is the complete transition table; anything not listed here is
    /// rejected by the session guard instead of silently applied.
    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (*self, next),
            (Idle, RequestingMedia)
                | (RequestingMedia, Negotiating)
                | (RequestingMedia, Terminating)
                | (RequestingMedia, Failed)
                | (Negotiating, Active)
                | (Negotiating, Terminating)
                | (Negotiating, Failed)
                | (Active, Terminating)
                | (Active, Failed)
                | (Failed, Terminating)
                | (Terminating, Idle)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::RequestingMedia => "requesting_media",
            CallState::Negotiating => "negotiating",
            CallState::Active => "active",
            CallState::Terminating => "terminating",
            CallState::Failed => "failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who initiated the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Outgoing => "outgoing",
            CallDirection::Incoming => "incoming",
        }
    }
}

/// The one live call a session manager may hold.
pub(crate) struct ActiveCall {
    pub id: CallId,
    pub peer: PeerId,
    pub kind: CallKind,
    pub direction: CallDirection,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
    pub watchdog: Option<JoinHandle<()>>,
}

impl ActiveCall {
    pub fn new(id: CallId, peer: PeerId, kind: CallKind, direction: CallDirection) -> Self {
        Self {
            id,
            peer,
            kind,
            direction,
            state: CallState::RequestingMedia,
            created_at: Utc::now(),
            connected_at: None,
            end_reason: None,
            watchdog: None,
        }
    }

    pub fn info(&self) -> CallInfo {
        CallInfo {
            call_id: self.id,
            peer: self.peer.clone(),
            kind: self.kind,
            direction: self.direction,
            state: self.state,
            created_at: self.created_at,
            connected_at: self.connected_at,
            ended_at: None,
            end_reason: self.end_reason.clone(),
        }
    }
}

/// Point-in-time description of a call, past or present.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub call_id: CallId,
    pub peer: PeerId,
    pub kind: CallKind,
    pub direction: CallDirection,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
}

/// The reactive view the UI binds to.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub state: CallState,
    pub is_connecting: bool,
    pub is_connected: bool,
    pub call: Option<CallInfo>,
    pub local_stream: Option<Arc<MediaStreamHandle>>,
    pub remote_stream: Option<Arc<MediaStreamHandle>>,
    pub last_error: Option<CallError>,
}
