//! Media session manager: the sole owner of stream handles.
//!
//! Everything that touches camera/microphone resources goes through here.
//! The manager holds at most one local and one remote stream at a time,
//! exposes the local-only mute/video toggles, and funnels every
//! termination path through the idempotent [`MediaSessionManager::release_all`].

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capture::CaptureDevice;
use crate::error::MediaResult;
use crate::stream::{MediaStreamHandle, StreamDescriptor};
use crate::track::TrackKind;

pub struct MediaSessionManager {
    capture: Arc<dyn CaptureDevice>,
    local: RwLock<Option<Arc<MediaStreamHandle>>>,
    remote: RwLock<Option<Arc<MediaStreamHandle>>>,
}

impl MediaSessionManager {
    pub fn new(capture: Arc<dyn CaptureDevice>) -> Self {
        Self {
            capture,
            local: RwLock::new(None),
            remote: RwLock::new(None),
        }
    }

    /// Acquire the local stream: audio always, video when asked for.
    ///
    /// On a video failure the already-open audio track is stopped before
    /// the error is returned, so a failed acquisition leaks nothing. The
    /// new handle replaces (and releases) any leftover local stream.
    pub async fn acquire_local(&self, want_video: bool) -> MediaResult<Arc<MediaStreamHandle>> {
        let audio = self.capture.open_track(TrackKind::Audio).await?;
        let mut tracks = vec![Arc::new(audio)];

        if want_video {
            match self.capture.open_track(TrackKind::Video).await {
                Ok(video) => tracks.push(Arc::new(video)),
                Err(e) => {
                    for track in &tracks {
                        track.stop();
                    }
                    debug!(error = %e, "video open failed, audio track unwound");
                    return Err(e);
                }
            }
        }

        let handle = Arc::new(MediaStreamHandle::local(tracks));
        let previous = self.local.write().replace(handle.clone());
        if let Some(previous) = previous {
            warn!(stream = %previous.id(), "releasing leftover local stream");
            previous.release();
        }

        info!(stream = %handle.id(), video = want_video, "local media acquired");
        Ok(handle)
    }

    /// Publish the remote party's stream to observers.
    pub fn publish_remote(&self, descriptor: &StreamDescriptor) -> Arc<MediaStreamHandle> {
        let handle = Arc::new(MediaStreamHandle::from_descriptor(descriptor));
        let previous = self.remote.write().replace(handle.clone());
        if let Some(previous) = previous {
            warn!(stream = %previous.id(), "releasing leftover remote stream");
            previous.release();
        }

        info!(stream = %handle.id(), video = handle.has_video(), "remote media published");
        handle
    }

    pub fn local_stream(&self) -> Option<Arc<MediaStreamHandle>> {
        self.local.read().clone()
    }

    pub fn remote_stream(&self) -> Option<Arc<MediaStreamHandle>> {
        self.remote.read().clone()
    }

    /// Mute or unmute the local audio tracks. Remote tracks are never
    /// touched; without a local stream this is a no-op.
    pub fn set_muted(&self, muted: bool) {
        match self.local.read().as_ref() {
            Some(local) => {
                let changed = local.set_enabled(TrackKind::Audio, !muted);
                debug!(muted, tracks = changed, "local audio toggled");
            }
            None => debug!(muted, "no local stream, mute ignored"),
        }
    }

    /// Enable or disable the local video tracks. Same no-op semantics as
    /// [`Self::set_muted`].
    pub fn set_video_enabled(&self, enabled: bool) {
        match self.local.read().as_ref() {
            Some(local) => {
                let changed = local.set_enabled(TrackKind::Video, enabled);
                debug!(enabled, tracks = changed, "local video toggled");
            }
            None => debug!(enabled, "no local stream, video toggle ignored"),
        }
    }

    /// Stop every track on both streams and drop the handles. Idempotent;
    /// this is the one cleanup path every call termination funnels into.
    pub fn release_all(&self) {
        let local = self.local.write().take();
        let remote = self.remote.write().take();
        if local.is_none() && remote.is_none() {
            return;
        }

        if let Some(handle) = local {
            handle.release();
        }
        if let Some(handle) = remote {
            handle.release();
        }
        info!("media resources released");
    }
}

// Abrupt-teardown backstop; normal termination has already released.
impl Drop for MediaSessionManager {
    fn drop(&mut self) {
        self.release_all();
    }
}
