//! Capture device abstraction and the mock device used in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::track::{MediaTrack, TrackKind, TrackSource};

/// Opens capture hardware one track at a time.
///
/// Implementations wrap the platform's camera/microphone API. Opening is
/// async because permission prompts and hardware spin-up take real time,
/// and callers may be canceled while waiting.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open_track(&self, kind: TrackKind) -> MediaResult<MediaTrack>;
}

/// Configurable capture double for tests and demos.
///
/// Failure modes are runtime-settable so a test can deny a device, watch
/// the failure surface, then grant it and retry. The shared closed-track
/// counter lets tests assert that every opened track was stopped exactly
/// once.
pub struct MockCaptureDevice {
    deny_audio: AtomicBool,
    deny_video: AtomicBool,
    video_absent: AtomicBool,
    open_delay: Mutex<Duration>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl MockCaptureDevice {
    pub fn new() -> Self {
        Self {
            deny_audio: AtomicBool::new(false),
            deny_video: AtomicBool::new(false),
            video_absent: AtomicBool::new(false),
            open_delay: Mutex::new(Duration::ZERO),
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delay every open by `delay`, to give cancellation tests a window.
    pub fn with_open_delay(self, delay: Duration) -> Self {
        *self.open_delay.lock() = delay;
        self
    }

    pub fn with_deny_audio(self) -> Self {
        self.deny_audio.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_deny_video(self) -> Self {
        self.deny_video.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_video_absent(self) -> Self {
        self.video_absent.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_deny_audio(&self, deny: bool) {
        self.deny_audio.store(deny, Ordering::SeqCst);
    }

    pub fn set_deny_video(&self, deny: bool) {
        self.deny_video.store(deny, Ordering::SeqCst);
    }

    /// Tracks opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Track sources stopped so far.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for MockCaptureDevice {
    async fn open_track(&self, kind: TrackKind) -> MediaResult<MediaTrack> {
        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match kind {
            TrackKind::Audio if self.deny_audio.load(Ordering::SeqCst) => {
                Err(MediaError::device_denied("microphone permission denied"))
            }
            TrackKind::Video if self.deny_video.load(Ordering::SeqCst) => {
                Err(MediaError::device_denied("camera permission denied"))
            }
            TrackKind::Video if self.video_absent.load(Ordering::SeqCst) => {
                Err(MediaError::device_unavailable("no camera present"))
            }
            _ => {
                self.opened.fetch_add(1, Ordering::SeqCst);
                debug!(%kind, "mock capture track opened");
                let source = MockTrackSource {
                    label: format!("mock-{kind}"),
                    closed: self.closed.clone(),
                };
                Ok(MediaTrack::new(kind, Box::new(source)))
            }
        }
    }
}

struct MockTrackSource {
    label: String,
    closed: Arc<AtomicUsize>,
}

impl TrackSource for MockTrackSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        debug!(label = %self.label, "mock capture track stopped");
    }
}
