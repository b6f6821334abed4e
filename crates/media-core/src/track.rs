//! Individual media tracks.
//!
//! A [`MediaTrack`] is one audio or video feed inside a stream. Local tracks
//! wrap a [`TrackSource`] that owns the underlying capture resource; remote
//! tracks have no source, they mirror what the other side described. A track
//! stops exactly once no matter how many paths race to stop it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use parking_lot::Mutex;

/// Kind of media a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique identifier for a track, stable across the signaling plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The capture resource behind a local track.
///
/// Implementations wrap whatever the platform hands out for an open
/// microphone or camera; `stop` must release it. The track guarantees
/// `stop` is called at most once.
pub trait TrackSource: Send + Sync {
    fn label(&self) -> &str;
    fn stop(&self);
}

/// One audio or video feed.
pub struct MediaTrack {
    id: TrackId,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    source: Mutex<Option<Box<dyn TrackSource>>>,
}

impl MediaTrack {
    /// A locally captured track owning its source.
    pub fn new(kind: TrackKind, source: Box<dyn TrackSource>) -> Self {
        Self {
            id: TrackId::new(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            source: Mutex::new(Some(source)),
        }
    }

    /// A remote track known only by its advertised id and kind.
    pub fn remote(id: TrackId, kind: TrackKind) -> Self {
        Self {
            id,
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            source: Mutex::new(None),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Toggle the track. No-op once the track is stopped.
    pub fn set_enabled(&self, enabled: bool) {
        if self.is_stopped() {
            return;
        }
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the track and release its source. Idempotent; the source's
    /// `stop` runs at most once.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            if let Some(source) = self.source.lock().take() {
                source.stop();
            }
        }
    }
}

impl Drop for MediaTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource(Arc<AtomicUsize>);

    impl TrackSource for CountingSource {
        fn label(&self) -> &str {
            "counting"
        }

        fn stop(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stop_releases_source_exactly_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let track = MediaTrack::new(TrackKind::Audio, Box::new(CountingSource(stops.clone())));

        track.stop();
        track.stop();
        track.stop();
        assert!(track.is_stopped());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_stops_unstopped_track() {
        let stops = Arc::new(AtomicUsize::new(0));
        {
            let _track =
                MediaTrack::new(TrackKind::Video, Box::new(CountingSource(stops.clone())));
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_toggle_after_stop_is_noop() {
        let stops = Arc::new(AtomicUsize::new(0));
        let track = MediaTrack::new(TrackKind::Audio, Box::new(CountingSource(stops)));
        assert!(track.is_enabled());

        track.set_enabled(false);
        assert!(!track.is_enabled());

        track.stop();
        track.set_enabled(true);
        assert!(!track.is_enabled(), "toggles after stop must not apply");
    }

    #[test]
    fn test_remote_track_has_no_source() {
        let track = MediaTrack::remote(TrackId::new(), TrackKind::Video);
        assert!(track.is_enabled());
        track.stop();
        assert!(track.is_stopped());
    }
}
