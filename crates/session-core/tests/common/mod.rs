//! Shared helpers for call session integration tests.
//!
//! Every test drives real managers over the in-memory signaling hub with
//! mock capture devices, and observes progress through the event feed
//! rather than by sleeping.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use telecare_session_core::{
    CallConfig, CallError, CallEvent, CallInfo, CallManagerBuilder, CallSessionManager, CallState,
    MemorySignalingHub, MockCaptureDevice,
};

/// How long any single awaited event may take before the test fails.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// One endpoint under test.
///
/// The event subscription is opened before the manager starts, so tests
/// see every event from the first call onwards.
pub struct TestPeer {
    pub manager: Arc<CallSessionManager>,
    pub device: Arc<MockCaptureDevice>,
    pub events: broadcast::Receiver<CallEvent>,
}

pub async fn start_peer(hub: &Arc<MemorySignalingHub>, name: &str) -> TestPeer {
    start_peer_with(hub, name, MockCaptureDevice::new(), CallConfig::default()).await
}

pub async fn start_peer_with(
    hub: &Arc<MemorySignalingHub>,
    name: &str,
    device: MockCaptureDevice,
    config: CallConfig,
) -> TestPeer {
    let device = Arc::new(device);
    let manager = CallManagerBuilder::new(name)
        .with_transport(hub.clone())
        .with_capture(device.clone())
        .with_config(config)
        .build()
        .expect("manager should build");
    let events = manager.subscribe_events();
    manager.start().await.expect("manager should start");
    TestPeer {
        manager,
        device,
        events,
    }
}

/// Drain events until the call reaches `target`.
pub async fn wait_for_state(events: &mut broadcast::Receiver<CallEvent>, target: CallState) {
    timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await.expect("event channel should stay open") {
                CallEvent::CallStateChanged { new_state, .. } if new_state == target => return,
                _ => {}
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {target}"))
}

/// Drain events until the call ends, returning its final record.
pub async fn wait_for_ended(events: &mut broadcast::Receiver<CallEvent>) -> CallInfo {
    timeout(EVENT_TIMEOUT, async {
        loop {
            if let CallEvent::CallEnded { info } =
                events.recv().await.expect("event channel should stay open")
            {
                return info;
            }
        }
    })
    .await
    .expect("timed out waiting for call end")
}

/// Drain events until the call fails, returning the error.
pub async fn wait_for_failure(events: &mut broadcast::Receiver<CallEvent>) -> CallError {
    timeout(EVENT_TIMEOUT, async {
        loop {
            if let CallEvent::CallFailed { error, .. } =
                events.recv().await.expect("event channel should stay open")
            {
                return error;
            }
        }
    })
    .await
    .expect("timed out waiting for call failure")
}

/// Collect every event up to the call end; the end record comes separately.
pub async fn drain_until_ended(
    events: &mut broadcast::Receiver<CallEvent>,
) -> (Vec<CallEvent>, CallInfo) {
    timeout(EVENT_TIMEOUT, async {
        let mut seen = Vec::new();
        loop {
            match events.recv().await.expect("event channel should stay open") {
                CallEvent::CallEnded { info } => return (seen, info),
                other => seen.push(other),
            }
        }
    })
    .await
    .expect("timed out waiting for call end")
}
