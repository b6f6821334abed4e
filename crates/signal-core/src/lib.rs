//! Signaling primitives for the telecare call stack.
//!
//! This crate covers the control plane of a call: stable peer identities,
//! the messages that set calls up and tear them down, and the binding of
//! the local identity to a relay so the user becomes reachable by peer id.
//!
//! ```text
//!   SessionBinder ── bind(identity) ──▶ SignalingTransport
//!        │                                    │
//!        │ owns                               │ produces
//!        ▼                                    ▼
//!   SignalingChannel ◀──────────────── ChannelBinding
//!        │                                    │
//!        │ send(to, message)                  │ events
//!        ▼                                    ▼
//!      remote peer                 mpsc stream of SignalingEvent
//! ```
//!
//! Media never appears here as a type: offers and answers carry stream
//! descriptions as opaque strings, produced and consumed by the media
//! layer above.

pub mod binder;
pub mod error;
pub mod memory;
pub mod transport;
pub mod types;

pub use binder::SessionBinder;
pub use error::{SignalError, SignalResult};
pub use memory::{MemoryChannel, MemorySignalingHub};
pub use transport::{ChannelBinding, SignalingChannel, SignalingTransport};
pub use types::{CallId, CallKind, PeerId, RejectReason, SignalingEvent, SignalingMessage};
