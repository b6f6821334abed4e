//! The call session manager.
//!
//! One manager owns one signaling identity and at most one live call.
//! All state lives behind a single session slot; signaling messages,
//! user commands, and background tasks all funnel their state changes
//! through the same transition and termination paths, so every way a
//! call can end releases media exactly once.
//!
//! Locking rules: the session slot and the media manager use short
//! synchronous critical sections, never held across an await. When both
//! are taken the order is session first, media second.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use telecare_media_core::{CaptureDevice, MediaSessionManager, MediaStreamHandle, StreamDescriptor};
use telecare_signal_core::{
    CallId, CallKind, PeerId, RejectReason, SessionBinder, SignalingEvent, SignalingMessage,
    SignalingTransport,
};

use crate::call::{ActiveCall, CallDirection, CallInfo, CallSnapshot, CallState};
use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::events::{CallAction, CallEvent, CallEventHandler, ContactDirectory, IncomingCall};
use crate::retry::retry_with_backoff;

/// Lifetime counters for one manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    /// Calls admitted as sessions, both directions.
    pub total_calls: u64,
    /// Calls that reached [`CallState::Active`].
    pub connected_calls: u64,
    /// Calls that ended through [`CallState::Failed`].
    pub failed_calls: u64,
    /// Inbound offers turned away without becoming a session.
    pub rejected_inbound: u64,
}

#[derive(Default)]
struct StatsCounters {
    total_calls: AtomicU64,
    connected_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_inbound: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> CallStats {
        CallStats {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            connected_calls: self.connected_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            rejected_inbound: self.rejected_inbound.load(Ordering::Relaxed),
        }
    }
}

/// Manages the signaling identity, the call state machine, and media
/// resources for one endpoint.
///
/// Construct through [`crate::CallManagerBuilder`], then [`start`] to go
/// reachable. Stop with [`stop`]; dropping without stopping leaves the
/// identity bound until the transport notices.
///
/// [`start`]: CallSessionManager::start
/// [`stop`]: CallSessionManager::stop
pub struct CallSessionManager {
    identity: PeerId,
    config: CallConfig,
    binder: SessionBinder,
    media: Arc<MediaSessionManager>,
    contacts: Option<Arc<dyn ContactDirectory>>,

    /// The single live call, when there is one.
    session: Mutex<Option<ActiveCall>>,
    last_error: Mutex<Option<CallError>>,
    handler: RwLock<Option<Arc<dyn CallEventHandler>>>,
    event_tx: broadcast::Sender<CallEvent>,
    stats: StatsCounters,

    is_running: AtomicBool,
    signaling_task: Mutex<Option<JoinHandle<()>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl CallSessionManager {
    pub(crate) fn new(
        identity: PeerId,
        config: CallConfig,
        transport: Arc<dyn SignalingTransport>,
        capture: Arc<dyn CaptureDevice>,
        contacts: Option<Arc<dyn ContactDirectory>>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            identity,
            config,
            binder: SessionBinder::new(transport),
            media: Arc::new(MediaSessionManager::new(capture)),
            contacts,
            session: Mutex::new(None),
            last_error: Mutex::new(None),
            handler: RwLock::new(None),
            event_tx,
            stats: StatsCounters::default(),
            is_running: AtomicBool::new(false),
            signaling_task: Mutex::new(None),
            dispatch_task: Mutex::new(None),
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bind the identity and start processing signaling.
    ///
    /// Binding is retried per [`CallConfig::bind_retry`] for recoverable
    /// transport errors; a taken identity fails immediately with
    /// [`CallError::IdentityUnavailable`]. Calling `start` on an already
    /// running manager is a no-op.
    pub async fn start(self: &Arc<Self>) -> CallResult<()> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(identity = %self.identity, "session manager already started");
            return Ok(());
        }

        let bind_retry = self.config.bind_retry.clone();
        let events = match retry_with_backoff("bind signaling identity", bind_retry, || async {
            self.binder
                .bind(&self.identity)
                .await
                .map_err(CallError::from)
        })
        .await
        {
            Ok(events) => events,
            Err(e) => {
                self.is_running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        *self.signaling_task.lock() = Some(tokio::spawn(self.clone().signaling_loop(events)));
        *self.dispatch_task.lock() =
            Some(tokio::spawn(self.clone().dispatch_loop(self.event_tx.subscribe())));

        info!(identity = %self.identity, "call session manager started");
        Ok(())
    }

    /// End any live call, release the identity, and stop background tasks.
    ///
    /// Safe to call on a stopped manager; the manager can be started again
    /// afterwards.
    pub async fn stop(&self) -> CallResult<()> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!(identity = %self.identity, "stopping call session manager");

        self.end_call().await?;
        self.binder.unbind().await;

        if let Some(task) = self.signaling_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.dispatch_task.lock().take() {
            task.abort();
        }

        info!(identity = %self.identity, "call session manager stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn identity(&self) -> &PeerId {
        &self.identity
    }

    // ========================================================================
    // Call control
    // ========================================================================

    /// Start an outgoing call to `remote`.
    ///
    /// Returns the call id as soon as the session slot is claimed; media
    /// acquisition and the offer continue in the background, with progress
    /// reported through events. Fails synchronously with
    /// [`CallError::SessionBusy`] when a call is already in progress.
    pub async fn start_call(
        self: &Arc<Self>,
        remote: PeerId,
        kind: CallKind,
    ) -> CallResult<CallId> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(CallError::NotStarted);
        }

        let call_id = CallId::new_v4();
        {
            let mut session = self.session.lock();
            if session.is_some() {
                debug!(peer = %remote, "call not started, session already in a call");
                return Err(CallError::SessionBusy);
            }
            self.emit(CallEvent::CallStateChanged {
                call_id,
                previous: CallState::Idle,
                new_state: CallState::RequestingMedia,
                reason: None,
                timestamp: Utc::now(),
            });
            *session = Some(ActiveCall::new(
                call_id,
                remote.clone(),
                kind,
                CallDirection::Outgoing,
            ));
        }

        *self.last_error.lock() = None;
        self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
        info!(call_id = %call_id, peer = %remote, kind = %kind, "starting outgoing call");

        tokio::spawn(self.clone().run_outbound(call_id, remote, kind));
        Ok(call_id)
    }

    /// Hang up the current call, whatever state it is in.
    ///
    /// A no-op when idle. During media acquisition the call is marked
    /// terminating and the acquiring task finishes the cleanup, so the
    /// call can never surface as active afterwards.
    pub async fn end_call(&self) -> CallResult<()> {
        enum Action {
            Nothing,
            Deferred,
            Terminate { call_id: CallId, notify: bool },
        }

        let action = {
            let mut session = self.session.lock();
            match session.as_mut() {
                None => Action::Nothing,
                Some(call) => match call.state {
                    CallState::Terminating => Action::Nothing,
                    CallState::RequestingMedia => {
                        self.apply_transition(call, CallState::Terminating, Some("local hangup"));
                        call.end_reason = Some("local hangup".to_string());
                        Action::Deferred
                    }
                    state => Action::Terminate {
                        call_id: call.id,
                        notify: matches!(state, CallState::Negotiating | CallState::Active),
                    },
                },
            }
        };

        match action {
            Action::Nothing => {}
            Action::Deferred => {
                debug!("hangup during media setup, cleanup deferred to the acquiring task");
            }
            Action::Terminate { call_id, notify } => {
                self.terminate_call(call_id, "local hangup", notify).await;
            }
        }
        Ok(())
    }

    /// Mute or unmute local audio. Local-only; a no-op without a live
    /// local stream.
    pub fn set_muted(&self, muted: bool) {
        self.media.set_muted(muted);
    }

    /// Enable or disable local video. Local-only; a no-op without a live
    /// local stream.
    pub fn set_video_enabled(&self, enabled: bool) {
        self.media.set_video_enabled(enabled);
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Current call state, [`CallState::Idle`] when no call is present.
    pub fn state(&self) -> CallState {
        self.session
            .lock()
            .as_ref()
            .map(|call| call.state)
            .unwrap_or(CallState::Idle)
    }

    pub fn current_call(&self) -> Option<CallInfo> {
        self.session.lock().as_ref().map(ActiveCall::info)
    }

    /// A consistent point-in-time view for UI binding.
    pub fn snapshot(&self) -> CallSnapshot {
        let (state, call) = {
            let session = self.session.lock();
            match session.as_ref() {
                Some(call) => (call.state, Some(call.info())),
                None => (CallState::Idle, None),
            }
        };

        CallSnapshot {
            state,
            is_connecting: state.is_connecting(),
            is_connected: state.is_connected(),
            call,
            local_stream: self.media.local_stream(),
            remote_stream: self.media.remote_stream(),
            last_error: self.last_error.lock().clone(),
        }
    }

    pub fn local_stream(&self) -> Option<Arc<MediaStreamHandle>> {
        self.media.local_stream()
    }

    pub fn remote_stream(&self) -> Option<Arc<MediaStreamHandle>> {
        self.media.remote_stream()
    }

    pub fn last_error(&self) -> Option<CallError> {
        self.last_error.lock().clone()
    }

    pub fn stats(&self) -> CallStats {
        self.stats.snapshot()
    }

    /// Subscribe to call events. Each subscriber sees every event from
    /// subscription onwards.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    /// The event feed as a [`futures::Stream`](tokio_stream::Stream).
    pub fn event_stream(&self) -> BroadcastStream<CallEvent> {
        BroadcastStream::new(self.event_tx.subscribe())
    }

    /// Install the application handler consulted for inbound calls and
    /// notified of call progress. Replaces any previous handler.
    pub fn set_event_handler(&self, handler: Arc<dyn CallEventHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Remove the handler; inbound calls are auto-accepted again.
    pub fn clear_event_handler(&self) {
        *self.handler.write() = None;
    }

    // ========================================================================
    // Outbound call continuation
    // ========================================================================

    async fn run_outbound(self: Arc<Self>, call_id: CallId, remote: PeerId, kind: CallKind) {
        let local = match self.media.acquire_local(kind.has_video()).await {
            Ok(handle) => handle,
            Err(e) => {
                self.fail_and_terminate(call_id, None, e.into(), false).await;
                return;
            }
        };

        let proceed = {
            let mut session = self.session.lock();
            match session.as_mut() {
                Some(call) if call.id == call_id && call.state == CallState::RequestingMedia => {
                    self.apply_transition(call, CallState::Negotiating, None)
                }
                _ => false,
            }
        };
        if !proceed {
            // Hung up while the devices were opening. The slot may already
            // belong to a successor call, so release only this handle and
            // leave the media slots to the termination path.
            local.release();
            self.terminate_call(call_id, "canceled during media setup", false)
                .await;
            return;
        }

        let payload = match serde_json::to_string(&local.descriptor()) {
            Ok(payload) => payload,
            Err(e) => {
                let error =
                    CallError::internal_error(format!("failed to encode stream descriptor: {e}"));
                self.fail_and_terminate(call_id, None, error, false).await;
                return;
            }
        };

        let Some(channel) = self.binder.channel() else {
            self.fail_and_terminate(call_id, None, CallError::channel_error("not bound"), false)
                .await;
            return;
        };
        let offer = SignalingMessage::Offer {
            call_id,
            kind,
            session: payload,
        };
        if let Err(e) = channel.send(&remote, offer).await {
            self.fail_and_terminate(call_id, None, e.into(), false).await;
            return;
        }

        info!(call_id = %call_id, peer = %remote, "call offer sent, awaiting answer");
        self.spawn_watchdog(call_id);
    }

    /// Arm the negotiation timeout for a call that just entered
    /// [`CallState::Negotiating`].
    fn spawn_watchdog(self: &Arc<Self>, call_id: CallId) {
        let timeout = self.config.negotiation_timeout;
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.on_negotiation_timeout(call_id).await;
        });

        let mut session = self.session.lock();
        match session.as_mut() {
            Some(call) if call.id == call_id && call.state == CallState::Negotiating => {
                call.watchdog = Some(handle);
            }
            // The call moved on before the timer was armed.
            _ => handle.abort(),
        }
    }

    async fn on_negotiation_timeout(&self, call_id: CallId) {
        let expired = {
            let session = self.session.lock();
            matches!(
                session.as_ref(),
                Some(call) if call.id == call_id && call.state == CallState::Negotiating
            )
        };
        if !expired {
            return;
        }

        let duration_ms = self.config.negotiation_timeout.as_millis() as u64;
        warn!(call_id = %call_id, timeout_ms = duration_ms, "negotiation timed out");
        self.fail_and_terminate(
            call_id,
            Some(CallState::Negotiating),
            CallError::NegotiationTimeout { duration_ms },
            true,
        )
        .await;
    }

    // ========================================================================
    // Inbound signaling
    // ========================================================================

    async fn handle_offer(
        self: &Arc<Self>,
        from: PeerId,
        call_id: CallId,
        kind: CallKind,
        payload: String,
    ) {
        if self.session.lock().is_some() {
            info!(call_id = %call_id, from = %from, "busy, rejecting inbound call");
            self.reject_offer(&from, call_id, RejectReason::Busy).await;
            return;
        }

        let display_name = self
            .contacts
            .as_ref()
            .and_then(|contacts| contacts.display_name(&from));
        let incoming = IncomingCall {
            call_id,
            from: from.clone(),
            display_name,
            kind,
            received_at: Utc::now(),
        };
        info!(call_id = %call_id, from = %from, kind = %kind, "incoming call");
        self.emit(CallEvent::IncomingCall(incoming.clone()));

        let handler = self.handler.read().clone();
        let action = match handler {
            Some(handler) => handler.on_incoming_call(incoming).await,
            None => CallAction::Accept,
        };
        match action {
            CallAction::Accept => {}
            CallAction::Reject => {
                info!(call_id = %call_id, from = %from, "inbound call declined by handler");
                self.reject_offer(&from, call_id, RejectReason::Declined)
                    .await;
                return;
            }
            CallAction::Ignore => {
                debug!(call_id = %call_id, from = %from, "inbound call ignored by handler");
                return;
            }
        }

        let descriptor: StreamDescriptor = match serde_json::from_str(&payload) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(call_id = %call_id, from = %from, error = %e, "offer carried a malformed session description");
                self.reject_offer(&from, call_id, RejectReason::Error).await;
                return;
            }
        };

        // Re-check under the lock: a call may have started while the
        // handler was deciding.
        let claimed = {
            let mut session = self.session.lock();
            if session.is_some() {
                false
            } else {
                self.emit(CallEvent::CallStateChanged {
                    call_id,
                    previous: CallState::Idle,
                    new_state: CallState::RequestingMedia,
                    reason: None,
                    timestamp: Utc::now(),
                });
                *session = Some(ActiveCall::new(
                    call_id,
                    from.clone(),
                    kind,
                    CallDirection::Incoming,
                ));
                true
            }
        };
        if !claimed {
            info!(call_id = %call_id, from = %from, "went busy while ringing, rejecting inbound call");
            self.reject_offer(&from, call_id, RejectReason::Busy).await;
            return;
        }

        *self.last_error.lock() = None;
        self.stats.total_calls.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(self.clone().run_inbound(call_id, from, kind, descriptor));
    }

    /// Turn an inbound offer away without admitting it as a session.
    async fn reject_offer(&self, to: &PeerId, call_id: CallId, reason: RejectReason) {
        self.stats.rejected_inbound.fetch_add(1, Ordering::Relaxed);
        self.emit(CallEvent::IncomingCallRejected {
            peer: to.clone(),
            reason,
            timestamp: Utc::now(),
        });

        if let Some(channel) = self.binder.channel() {
            if let Err(e) = channel
                .send(to, SignalingMessage::Reject { call_id, reason })
                .await
            {
                debug!(call_id = %call_id, to = %to, error = %e, "reject notification failed");
            }
        }
    }

    async fn run_inbound(
        self: Arc<Self>,
        call_id: CallId,
        peer: PeerId,
        kind: CallKind,
        remote_descriptor: StreamDescriptor,
    ) {
        let local = match self.media.acquire_local(kind.has_video()).await {
            Ok(handle) => handle,
            Err(e) => {
                // The caller is waiting on an answer; turn the offer down
                // so it does not sit in negotiation until its watchdog.
                if let Some(channel) = self.binder.channel() {
                    let reject = SignalingMessage::Reject {
                        call_id,
                        reason: RejectReason::Error,
                    };
                    if let Err(e) = channel.send(&peer, reject).await {
                        debug!(call_id = %call_id, error = %e, "reject notification failed");
                    }
                }
                self.fail_and_terminate(call_id, None, e.into(), false).await;
                return;
            }
        };

        let proceed = {
            let mut session = self.session.lock();
            match session.as_mut() {
                Some(call) if call.id == call_id && call.state == CallState::RequestingMedia => {
                    self.apply_transition(call, CallState::Negotiating, None)
                }
                _ => false,
            }
        };
        if !proceed {
            // Only this call's handle; the media slots may already hold a
            // successor's streams.
            local.release();
            self.terminate_call(call_id, "canceled during media setup", true)
                .await;
            return;
        }

        let remote = self.media.publish_remote(&remote_descriptor);

        let payload = match serde_json::to_string(&local.descriptor()) {
            Ok(payload) => payload,
            Err(e) => {
                let error =
                    CallError::internal_error(format!("failed to encode stream descriptor: {e}"));
                self.fail_and_terminate(call_id, None, error, true).await;
                return;
            }
        };

        let Some(channel) = self.binder.channel() else {
            self.fail_and_terminate(call_id, None, CallError::channel_error("not bound"), false)
                .await;
            return;
        };
        let answer = SignalingMessage::Answer {
            call_id,
            session: payload,
        };
        if let Err(e) = channel.send(&peer, answer).await {
            self.fail_and_terminate(call_id, None, e.into(), false).await;
            return;
        }

        // Answer is on the wire; this side goes active immediately.
        if self.try_activate(call_id) {
            self.stats.connected_calls.fetch_add(1, Ordering::Relaxed);
            info!(call_id = %call_id, peer = %peer, "call active");
        } else {
            // The call was torn down while the answer was in flight;
            // drop only the handles this continuation owns.
            local.release();
            remote.release();
            self.terminate_call(call_id, "canceled during answer", true)
                .await;
        }
    }

    async fn handle_answer(&self, from: PeerId, call_id: CallId, payload: String) {
        enum Verdict {
            Publish,
            WrongState(CallState),
            Stale,
        }

        let verdict = {
            let session = self.session.lock();
            match session.as_ref() {
                Some(call) if call.id == call_id && call.peer == from => {
                    if call.state == CallState::Negotiating {
                        Verdict::Publish
                    } else {
                        Verdict::WrongState(call.state)
                    }
                }
                _ => Verdict::Stale,
            }
        };

        match verdict {
            Verdict::Publish => {}
            Verdict::WrongState(state) => {
                warn!(call_id = %call_id, from = %from, state = %state, "answer in unexpected state, ignoring");
                return;
            }
            Verdict::Stale => {
                // The remote answered a call we no longer hold; tell them
                // to tear it down.
                debug!(call_id = %call_id, from = %from, "answer for an unknown call, replying hangup");
                if let Some(channel) = self.binder.channel() {
                    if let Err(e) = channel
                        .send(&from, SignalingMessage::Hangup { call_id })
                        .await
                    {
                        debug!(call_id = %call_id, error = %e, "hangup notification failed");
                    }
                }
                return;
            }
        }

        let descriptor: StreamDescriptor = match serde_json::from_str(&payload) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(call_id = %call_id, from = %from, error = %e, "answer carried a malformed session description");
                let error = CallError::negotiation_error("malformed answer session description");
                self.fail_and_terminate(call_id, None, error, true).await;
                return;
            }
        };

        let remote = self.media.publish_remote(&descriptor);

        if self.try_activate(call_id) {
            self.stats.connected_calls.fetch_add(1, Ordering::Relaxed);
            info!(call_id = %call_id, peer = %from, "call active");
        } else {
            // Canceled between the answer check and activation; the just
            // published handle is the only thing this path owns.
            remote.release();
            self.terminate_call(call_id, "canceled during answer", true)
                .await;
        }
    }

    async fn handle_reject(&self, from: PeerId, call_id: CallId, reason: RejectReason) {
        let relevant = {
            let session = self.session.lock();
            matches!(
                session.as_ref(),
                Some(call) if call.id == call_id
                    && call.peer == from
                    && call.state == CallState::Negotiating
            )
        };
        if !relevant {
            debug!(call_id = %call_id, from = %from, reason = %reason, "reject for no matching call, ignoring");
            return;
        }

        let error = match reason {
            RejectReason::Busy => CallError::Busy {
                peer: from.to_string(),
            },
            RejectReason::Declined => CallError::CallDeclined {
                peer: from.to_string(),
            },
            RejectReason::Error => CallError::negotiation_error("remote peer failed to answer"),
        };
        info!(call_id = %call_id, from = %from, reason = %reason, "call rejected by remote");
        self.fail_and_terminate(call_id, None, error, false).await;
    }

    async fn handle_hangup(&self, from: PeerId, call_id: CallId) {
        enum Verdict {
            Terminate,
            FailNegotiation,
            Deferred,
            Ignore,
        }

        let verdict = {
            let mut session = self.session.lock();
            match session.as_mut() {
                Some(call) if call.id == call_id && call.peer == from => match call.state {
                    CallState::Active => Verdict::Terminate,
                    CallState::Negotiating => Verdict::FailNegotiation,
                    CallState::RequestingMedia => {
                        self.apply_transition(call, CallState::Terminating, Some("remote hangup"));
                        call.end_reason = Some("remote hangup".to_string());
                        Verdict::Deferred
                    }
                    _ => Verdict::Ignore,
                },
                _ => Verdict::Ignore,
            }
        };

        match verdict {
            Verdict::Terminate => {
                info!(call_id = %call_id, from = %from, "remote hung up");
                self.terminate_call(call_id, "remote hangup", false).await;
            }
            Verdict::FailNegotiation => {
                let error = CallError::negotiation_error("remote hung up during negotiation");
                self.fail_and_terminate(call_id, None, error, false).await;
            }
            Verdict::Deferred => {
                debug!(call_id = %call_id, "remote hangup during media setup, cleanup deferred");
            }
            Verdict::Ignore => {
                debug!(call_id = %call_id, from = %from, "hangup for no matching call, ignoring");
            }
        }
    }

    // ========================================================================
    // State machine plumbing
    // ========================================================================

    /// Apply a state transition on the live call, emitting the change.
    /// Illegal transitions are logged and refused.
    fn apply_transition(&self, call: &mut ActiveCall, next: CallState, reason: Option<&str>) -> bool {
        let previous = call.state;
        if !previous.can_transition_to(next) {
            warn!(
                call_id = %call.id,
                from = %previous,
                to = %next,
                "refusing illegal call state transition"
            );
            return false;
        }
        call.state = next;
        debug!(call_id = %call.id, from = %previous, to = %next, "call state changed");
        self.emit(CallEvent::CallStateChanged {
            call_id: call.id,
            previous,
            new_state: next,
            reason: reason.map(str::to_string),
            timestamp: Utc::now(),
        });
        true
    }

    /// Move a negotiating call to active. False when the call is gone or
    /// was canceled in the meantime.
    fn try_activate(&self, call_id: CallId) -> bool {
        let mut session = self.session.lock();
        match session.as_mut() {
            Some(call) if call.id == call_id && call.state == CallState::Negotiating => {
                if let Some(watchdog) = call.watchdog.take() {
                    watchdog.abort();
                }
                if self.apply_transition(call, CallState::Active, None) {
                    call.connected_at = Some(Utc::now());
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// The one termination path: every call ends here exactly once.
    ///
    /// Clears the session slot, releases media, and emits the final
    /// transition and [`CallEvent::CallEnded`]. Safe to call repeatedly
    /// and from racing paths; only the first matching call wins.
    async fn terminate_call(&self, call_id: CallId, reason: &str, notify_remote: bool) {
        let peer = {
            let mut session = self.session.lock();
            let call = match session.as_mut() {
                Some(call) if call.id == call_id => call,
                _ => return,
            };

            if let Some(watchdog) = call.watchdog.take() {
                watchdog.abort();
            }
            if call.state != CallState::Terminating {
                self.apply_transition(call, CallState::Terminating, Some(reason));
            }
            call.end_reason.get_or_insert_with(|| reason.to_string());

            let mut info = call.info();
            info.ended_at = Some(Utc::now());
            let peer = call.peer.clone();

            // Media teardown happens under the session lock so a call
            // started right after cannot observe this call's streams.
            self.media.release_all();
            *session = None;

            self.emit(CallEvent::CallStateChanged {
                call_id,
                previous: CallState::Terminating,
                new_state: CallState::Idle,
                reason: Some(reason.to_string()),
                timestamp: Utc::now(),
            });
            self.emit(CallEvent::CallEnded { info });
            peer
        };

        if notify_remote {
            if let Some(channel) = self.binder.channel() {
                if let Err(e) = channel
                    .send(&peer, SignalingMessage::Hangup { call_id })
                    .await
                {
                    debug!(call_id = %call_id, error = %e, "hangup notification failed");
                }
            }
        }

        info!(call_id = %call_id, peer = %peer, reason, "call ended");
    }

    /// Record a call failure, then clean up through [`Self::terminate_call`].
    ///
    /// Emits [`CallEvent::CallFailed`] at most once per call; if the call
    /// is already terminating the failure is demoted to plain cleanup.
    /// With `expected` set, the failure only lands while the call is still
    /// in that state, so a state observed before this lock cannot fail a
    /// call that moved on in the gap.
    async fn fail_and_terminate(
        &self,
        call_id: CallId,
        expected: Option<CallState>,
        error: CallError,
        notify_remote: bool,
    ) {
        enum Outcome {
            Failed { peer: PeerId },
            Cleanup,
            Stale,
        }

        let outcome = {
            let mut session = self.session.lock();
            match (session.as_mut(), expected) {
                // The call left the state the caller checked for; this
                // failure belongs to a moment that has passed.
                (Some(call), Some(state)) if call.id == call_id && call.state != state => {
                    Outcome::Stale
                }
                (Some(call), _) if call.id == call_id => {
                    if let Some(watchdog) = call.watchdog.take() {
                        watchdog.abort();
                    }
                    let reason = error.to_string();
                    if self.apply_transition(call, CallState::Failed, Some(&reason)) {
                        call.end_reason = Some(reason);
                        Outcome::Failed {
                            peer: call.peer.clone(),
                        }
                    } else {
                        Outcome::Cleanup
                    }
                }
                _ => Outcome::Stale,
            }
        };

        match outcome {
            Outcome::Failed { peer } => {
                warn!(
                    call_id = %call_id,
                    peer = %peer,
                    error = %error,
                    category = error.category(),
                    "call failed"
                );
                self.emit(CallEvent::CallFailed {
                    call_id,
                    peer,
                    error: error.clone(),
                    timestamp: Utc::now(),
                });
                *self.last_error.lock() = Some(error);
                self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
                self.terminate_call(call_id, "call failed", notify_remote)
                    .await;
            }
            Outcome::Cleanup => {
                // Already terminating; just make sure the cleanup lands.
                self.terminate_call(call_id, "canceled", false).await;
            }
            Outcome::Stale => {
                debug!(call_id = %call_id, error = %error, "failure for a call no longer present");
            }
        }
    }

    // ========================================================================
    // Background loops
    // ========================================================================

    async fn signaling_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SignalingEvent>) {
        debug!(identity = %self.identity, "signaling loop started");
        while let Some(SignalingEvent { from, message }) = events.recv().await {
            debug!(from = %from, message = message.name(), "signaling message received");
            match message {
                SignalingMessage::Offer {
                    call_id,
                    kind,
                    session,
                } => self.handle_offer(from, call_id, kind, session).await,
                SignalingMessage::Answer { call_id, session } => {
                    self.handle_answer(from, call_id, session).await
                }
                SignalingMessage::Reject { call_id, reason } => {
                    self.handle_reject(from, call_id, reason).await
                }
                SignalingMessage::Hangup { call_id } => self.handle_hangup(from, call_id).await,
            }
        }

        // The receiver only closes underneath us if the channel died.
        if self.is_running.load(Ordering::SeqCst) {
            warn!(identity = %self.identity, "signaling channel lost");
            let failing = self.session.lock().as_ref().map(|call| call.id);
            match failing {
                Some(call_id) => {
                    self.fail_and_terminate(
                        call_id,
                        None,
                        CallError::channel_error("signaling channel lost"),
                        false,
                    )
                    .await;
                }
                None => {
                    *self.last_error.lock() =
                        Some(CallError::channel_error("signaling channel lost"));
                }
            }
        }
        debug!(identity = %self.identity, "signaling loop ended");
    }

    async fn dispatch_loop(self: Arc<Self>, mut events: broadcast::Receiver<CallEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(handler) = self.handler.read().clone() else {
                        continue;
                    };
                    match event {
                        CallEvent::CallStateChanged {
                            call_id,
                            previous,
                            new_state,
                            reason,
                            ..
                        } => {
                            handler
                                .on_call_state_changed(call_id, previous, new_state, reason)
                                .await;
                        }
                        CallEvent::CallFailed {
                            call_id,
                            peer,
                            error,
                            ..
                        } => {
                            handler.on_call_failed(call_id, peer, error).await;
                        }
                        CallEvent::CallEnded { info } => {
                            handler.on_call_ended(info).await;
                        }
                        // Inbound admission is consulted inline in
                        // handle_offer, not through the dispatch loop.
                        CallEvent::IncomingCall(_) | CallEvent::IncomingCallRejected { .. } => {}
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event dispatch lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn emit(&self, event: CallEvent) {
        // Send only fails with no subscribers, which is fine.
        let _ = self.event_tx.send(event);
    }
}

// Backstop for teardown without stop(); normal shutdown has already
// released everything.
impl Drop for CallSessionManager {
    fn drop(&mut self) {
        self.media.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CallManagerBuilder;
    use telecare_media_core::MockCaptureDevice;
    use telecare_signal_core::MemorySignalingHub;

    async fn started_manager() -> Arc<CallSessionManager> {
        let manager = CallManagerBuilder::new("alice")
            .with_transport(MemorySignalingHub::new())
            .with_capture(Arc::new(MockCaptureDevice::new()))
            .build()
            .expect("manager should build");
        manager.start().await.expect("manager should start");
        manager
    }

    fn install_call(manager: &CallSessionManager, state: CallState) -> CallId {
        let call_id = CallId::new_v4();
        let mut call = ActiveCall::new(
            call_id,
            PeerId::from("bob"),
            CallKind::Audio,
            CallDirection::Outgoing,
        );
        call.state = state;
        *manager.session.lock() = Some(call);
        call_id
    }

    #[tokio::test]
    async fn test_state_checked_failure_spares_a_call_that_moved_on() {
        let manager = started_manager().await;
        let call_id = install_call(&manager, CallState::Active);
        let mut events = manager.subscribe_events();

        // A timer that saw Negotiating before this lock must not fail the
        // call once the answer has activated it.
        manager
            .fail_and_terminate(
                call_id,
                Some(CallState::Negotiating),
                CallError::NegotiationTimeout { duration_ms: 200 },
                false,
            )
            .await;

        assert_eq!(manager.state(), CallState::Active);
        assert_eq!(
            manager.current_call().map(|call| call.call_id),
            Some(call_id)
        );
        assert!(manager.last_error().is_none());
        assert_eq!(manager.stats().failed_calls, 0);
        assert!(events.try_recv().is_err());

        manager.stop().await.expect("manager should stop");
    }

    #[tokio::test]
    async fn test_unchecked_failure_still_lands_on_an_active_call() {
        let manager = started_manager().await;
        let call_id = install_call(&manager, CallState::Active);
        let mut events = manager.subscribe_events();

        manager
            .fail_and_terminate(
                call_id,
                None,
                CallError::channel_error("signaling channel lost"),
                false,
            )
            .await;

        assert_eq!(manager.state(), CallState::Idle);
        assert_eq!(manager.stats().failed_calls, 1);

        let mut saw_failed = false;
        let mut saw_ended = false;
        while let Ok(event) = events.try_recv() {
            match event {
                CallEvent::CallFailed { call_id: id, .. } => {
                    assert_eq!(id, call_id);
                    saw_failed = true;
                }
                CallEvent::CallEnded { .. } => saw_ended = true,
                _ => {}
            }
        }
        assert!(saw_failed, "the failure should have been reported");
        assert!(saw_ended, "cleanup should have run");

        manager.stop().await.expect("manager should stop");
    }
}
