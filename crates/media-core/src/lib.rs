//! Media lifecycle management for the telecare call stack.
//!
//! Owns everything with a hardware cost: capture device access, audio and
//! video tracks, and the local/remote stream handles of a call. The
//! invariants this crate enforces:
//!
//! - every opened track is stopped exactly once, on every exit path;
//! - a released stream handle stays released, a new call acquires a new one;
//! - mute/video toggles touch only local tracks and become no-ops after
//!   release instead of errors;
//! - a failed acquisition unwinds whatever it had already opened before
//!   the error surfaces.
//!
//! Streams are described to the remote side by a serializable
//! [`StreamDescriptor`]; the signaling layer carries it as an opaque string.

pub mod capture;
pub mod error;
pub mod manager;
pub mod stream;
pub mod track;

pub use capture::{CaptureDevice, MockCaptureDevice};
pub use error::{MediaError, MediaResult};
pub use manager::MediaSessionManager;
pub use stream::{MediaStreamHandle, StreamDescriptor, StreamId, StreamOrigin, TrackDescriptor};
pub use track::{MediaTrack, TrackId, TrackKind, TrackSource};
