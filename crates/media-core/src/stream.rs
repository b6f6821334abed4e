//! Media stream handles and their wire-crossing descriptions.
//!
//! A [`MediaStreamHandle`] bundles the tracks of one direction of a call:
//! either the locally captured stream or the remote party's stream. Handles
//! are single-use; once released they stay released and a new call acquires
//! a new one. The serializable [`StreamDescriptor`] is how a stream is
//! described to the other side without media types crossing the signaling
//! plane.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

use crate::track::{MediaTrack, TrackId, TrackKind};

/// Unique identifier for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a stream's tracks come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    Local,
    Remote,
}

/// One track as advertised across the signaling plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: TrackId,
    pub kind: TrackKind,
}

/// A stream as advertised across the signaling plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub id: StreamId,
    pub tracks: Vec<TrackDescriptor>,
}

impl StreamDescriptor {
    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }
}

/// An owned set of tracks for one direction of a call.
pub struct MediaStreamHandle {
    id: StreamId,
    origin: StreamOrigin,
    tracks: Vec<Arc<MediaTrack>>,
    released: AtomicBool,
}

impl MediaStreamHandle {
    /// A stream of locally captured tracks.
    pub fn local(tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: StreamId::new(),
            origin: StreamOrigin::Local,
            tracks,
            released: AtomicBool::new(false),
        }
    }

    /// Reconstruct the remote party's stream from its description.
    pub fn from_descriptor(descriptor: &StreamDescriptor) -> Self {
        let tracks = descriptor
            .tracks
            .iter()
            .map(|t| Arc::new(MediaTrack::remote(t.id, t.kind)))
            .collect();
        Self {
            id: descriptor.id,
            origin: StreamOrigin::Remote,
            tracks,
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn origin(&self) -> StreamOrigin {
        self.origin
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> Vec<Arc<MediaTrack>> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> Vec<Arc<MediaTrack>> {
        self.tracks_of(TrackKind::Video)
    }

    fn tracks_of(&self, kind: TrackKind) -> Vec<Arc<MediaTrack>> {
        self.tracks
            .iter()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind() == TrackKind::Video)
    }

    /// Toggle every live track of `kind`. Returns how many tracks changed;
    /// released handles and stopped tracks are skipped.
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> usize {
        if self.is_released() {
            return 0;
        }
        let mut changed = 0;
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            if !track.is_stopped() {
                track.set_enabled(enabled);
                changed += 1;
            }
        }
        changed
    }

    /// Stop every track. Idempotent; once released a handle cannot be
    /// brought back.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            for track in &self.tracks {
                track.stop();
            }
            debug!(stream = %self.id, origin = ?self.origin, "stream released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// The wire-crossing description of this stream.
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            id: self.id,
            tracks: self
                .tracks
                .iter()
                .map(|t| TrackDescriptor {
                    id: t.id(),
                    kind: t.kind(),
                })
                .collect(),
        }
    }
}

impl Drop for MediaStreamHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for MediaStreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStreamHandle")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("tracks", &self.tracks.len())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_with(kinds: &[TrackKind]) -> StreamDescriptor {
        StreamDescriptor {
            id: StreamId::new(),
            tracks: kinds
                .iter()
                .map(|&kind| TrackDescriptor {
                    id: TrackId::new(),
                    kind,
                })
                .collect(),
        }
    }

    #[test]
    fn test_remote_stream_mirrors_descriptor() {
        let descriptor = descriptor_with(&[TrackKind::Audio, TrackKind::Video]);
        let handle = MediaStreamHandle::from_descriptor(&descriptor);

        assert_eq!(handle.origin(), StreamOrigin::Remote);
        assert_eq!(handle.id(), descriptor.id);
        assert!(handle.has_video());
        assert_eq!(handle.descriptor(), descriptor);
    }

    #[test]
    fn test_release_is_idempotent() {
        let handle = MediaStreamHandle::from_descriptor(&descriptor_with(&[TrackKind::Audio]));
        assert!(!handle.is_released());

        handle.release();
        handle.release();
        assert!(handle.is_released());
        assert!(handle.tracks()[0].is_stopped());
    }

    #[test]
    fn test_toggles_skip_released_handle() {
        let handle =
            MediaStreamHandle::from_descriptor(&descriptor_with(&[TrackKind::Audio, TrackKind::Audio]));
        assert_eq!(handle.set_enabled(TrackKind::Audio, false), 2);

        handle.release();
        assert_eq!(handle.set_enabled(TrackKind::Audio, true), 0);
        assert!(handle.audio_tracks().iter().all(|t| !t.is_enabled()));
    }
}
