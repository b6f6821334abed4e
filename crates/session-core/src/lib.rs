//! Call session management for the telecare stack.
//!
//! Ties the signaling plane (`telecare-signal-core`) and the media plane
//! (`telecare-media-core`) together into one [`CallSessionManager`] per
//! endpoint: one bound identity, at most one live call, and a guarantee
//! that capture resources are released exactly once on every way a call
//! can end.
//!
//! # Call states
//!
//! ```text
//!        start_call / accepted offer
//!   Idle ─────────────────────▶ RequestingMedia
//!    ▲                               │
//!    │                               ▼
//!    │                          Negotiating ───▶ Active
//!    │                               │              │
//!    │                               ▼              ▼
//!    └───────────────────────── Terminating ◀──  Failed
//! ```
//!
//! Every exit (hangup on either side, rejection, device failure,
//! negotiation timeout) funnels through `Terminating` and the same
//! cleanup path before the session is idle again.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telecare_session_core::{
//!     CallKind, CallManagerBuilder, MemorySignalingHub, MockCaptureDevice, PeerId,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = MemorySignalingHub::new();
//!
//!     let manager = CallManagerBuilder::new("alice")
//!         .with_transport(hub)
//!         .with_capture(Arc::new(MockCaptureDevice::new()))
//!         .build()?;
//!     manager.start().await?;
//!
//!     let call_id = manager
//!         .start_call(PeerId::from("bob"), CallKind::Video)
//!         .await?;
//!     println!("calling bob: {call_id}");
//!
//!     manager.end_call().await?;
//!     manager.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! Progress is observable three ways, usable together: poll
//! [`CallSessionManager::snapshot`] for UI binding, subscribe to the
//! [`CallEvent`] broadcast (also as a stream via
//! [`CallSessionManager::event_stream`]), or install a
//! [`CallEventHandler`] to decide inbound call admission and run async
//! reactions. Without a handler, inbound calls are accepted
//! automatically; while a call is in progress they are rejected as busy
//! without disturbing the session.

pub mod builder;
pub mod call;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod retry;

pub use builder::CallManagerBuilder;
pub use call::{CallDirection, CallInfo, CallSnapshot, CallState};
pub use config::CallConfig;
pub use error::{CallError, CallResult};
pub use events::{CallAction, CallEvent, CallEventHandler, ContactDirectory, IncomingCall};
pub use manager::{CallSessionManager, CallStats};
pub use retry::{RetryConfig, retry_with_backoff, with_timeout};

// The pieces of the lower layers that session users touch directly.
pub use telecare_media_core::{
    CaptureDevice, MediaStreamHandle, MediaTrack, MockCaptureDevice, StreamDescriptor,
    StreamOrigin, TrackKind,
};
pub use telecare_signal_core::{
    CallId, CallKind, MemorySignalingHub, PeerId, RejectReason, SignalingChannel,
    SignalingTransport,
};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
