//! End-to-end call lifecycle over the in-memory hub.
//!
//! Two real managers per test, mock devices, no sleeps on the happy
//! path: progress is observed through the event feed.

mod common;

use common::*;
use std::sync::Arc;
use tokio::time::timeout;

use telecare_session_core::{
    CallDirection, CallError, CallEvent, CallKind, CallManagerBuilder, CallState,
    ContactDirectory, MemorySignalingHub, MockCaptureDevice, PeerId, StreamOrigin,
};

#[tokio::test]
async fn test_video_call_end_to_end() {
    init_logging();
    let hub = MemorySignalingHub::new();
    let mut alice = start_peer(&hub, "alice").await;
    let mut callee = start_peer(&hub, "peer-42").await;

    let call_id = alice
        .manager
        .start_call(PeerId::from("peer-42"), CallKind::Video)
        .await
        .expect("call should start");

    wait_for_state(&mut alice.events, CallState::Active).await;
    wait_for_state(&mut callee.events, CallState::Active).await;

    // Both sides see the same call, from their own perspective.
    let outgoing = alice.manager.snapshot();
    assert!(outgoing.is_connected);
    let call = outgoing.call.as_ref().expect("caller should have call info");
    assert_eq!(call.call_id, call_id);
    assert_eq!(call.peer.as_str(), "peer-42");
    assert_eq!(call.direction, CallDirection::Outgoing);
    assert_eq!(call.kind, CallKind::Video);
    assert!(call.connected_at.is_some());

    let incoming = callee.manager.snapshot();
    let call = incoming.call.as_ref().expect("callee should have call info");
    assert_eq!(call.call_id, call_id);
    assert_eq!(call.peer.as_str(), "alice");
    assert_eq!(call.direction, CallDirection::Incoming);

    // Streams are live on both sides: local from capture, remote published
    // from the peer's descriptor.
    for snapshot in [&outgoing, &incoming] {
        let local = snapshot.local_stream.as_ref().expect("local stream");
        assert_eq!(local.origin(), StreamOrigin::Local);
        assert!(local.has_video());
        let remote = snapshot.remote_stream.as_ref().expect("remote stream");
        assert_eq!(remote.origin(), StreamOrigin::Remote);
        assert!(remote.has_video());
    }
    assert_eq!(alice.device.opened(), 2);
    assert_eq!(callee.device.opened(), 2);

    alice.manager.end_call().await.expect("hangup");

    let ended = wait_for_ended(&mut alice.events).await;
    assert_eq!(ended.end_reason.as_deref(), Some("local hangup"));
    let ended = wait_for_ended(&mut callee.events).await;
    assert_eq!(ended.end_reason.as_deref(), Some("remote hangup"));

    // Idle again with every capture resource returned.
    assert_eq!(alice.manager.state(), CallState::Idle);
    assert_eq!(callee.manager.state(), CallState::Idle);
    assert!(alice.manager.local_stream().is_none());
    assert!(callee.manager.remote_stream().is_none());
    assert_eq!(alice.device.closed(), alice.device.opened());
    assert_eq!(callee.device.closed(), callee.device.opened());

    let stats = alice.manager.stats();
    assert_eq!(stats.total_calls, 1);
    assert_eq!(stats.connected_calls, 1);
    assert_eq!(stats.failed_calls, 0);
}

#[tokio::test]
async fn test_audio_call_opens_no_camera() {
    init_logging();
    let hub = MemorySignalingHub::new();
    let mut alice = start_peer(&hub, "alice").await;
    let mut bob = start_peer(&hub, "bob").await;

    alice
        .manager
        .start_call(PeerId::from("bob"), CallKind::Audio)
        .await
        .expect("call should start");

    wait_for_state(&mut alice.events, CallState::Active).await;
    wait_for_state(&mut bob.events, CallState::Active).await;

    let local = alice.manager.local_stream().expect("local stream");
    assert!(!local.has_video());
    assert_eq!(alice.device.opened(), 1);
    assert_eq!(bob.device.opened(), 1);

    alice.manager.end_call().await.expect("hangup");
    wait_for_ended(&mut bob.events).await;
}

#[tokio::test]
async fn test_remote_hangup_ends_both_sides() {
    init_logging();
    let hub = MemorySignalingHub::new();
    let mut alice = start_peer(&hub, "alice").await;
    let mut bob = start_peer(&hub, "bob").await;

    alice
        .manager
        .start_call(PeerId::from("bob"), CallKind::Audio)
        .await
        .expect("call should start");
    wait_for_state(&mut alice.events, CallState::Active).await;
    wait_for_state(&mut bob.events, CallState::Active).await;

    // This time the callee hangs up.
    bob.manager.end_call().await.expect("hangup");

    let ended = wait_for_ended(&mut bob.events).await;
    assert_eq!(ended.end_reason.as_deref(), Some("local hangup"));
    let ended = wait_for_ended(&mut alice.events).await;
    assert_eq!(ended.end_reason.as_deref(), Some("remote hangup"));

    assert_eq!(alice.manager.state(), CallState::Idle);
    assert_eq!(bob.manager.state(), CallState::Idle);
    assert_eq!(alice.manager.stats().connected_calls, 1);
    assert_eq!(bob.manager.stats().connected_calls, 1);
    assert_eq!(alice.device.closed(), alice.device.opened());
    assert_eq!(bob.device.closed(), bob.device.opened());
}

#[tokio::test]
async fn test_incoming_call_reports_contact_name() {
    init_logging();

    struct StaticContacts;
    impl ContactDirectory for StaticContacts {
        fn display_name(&self, peer: &PeerId) -> Option<String> {
            (peer.as_str() == "alice").then(|| "Alice Cooper".to_string())
        }
    }

    let hub = MemorySignalingHub::new();
    let mut alice = start_peer(&hub, "alice").await;

    let bob = CallManagerBuilder::new("bob")
        .with_transport(hub.clone())
        .with_capture(Arc::new(MockCaptureDevice::new()))
        .with_contacts(Arc::new(StaticContacts))
        .build()
        .expect("manager should build");
    let mut bob_events = bob.subscribe_events();
    bob.start().await.expect("start");

    alice
        .manager
        .start_call(PeerId::from("bob"), CallKind::Audio)
        .await
        .expect("call should start");

    let incoming = timeout(EVENT_TIMEOUT, async {
        loop {
            if let CallEvent::IncomingCall(call) =
                bob_events.recv().await.expect("event channel should stay open")
            {
                return call;
            }
        }
    })
    .await
    .expect("timed out waiting for incoming call");

    assert_eq!(incoming.from.as_str(), "alice");
    assert_eq!(incoming.display_name.as_deref(), Some("Alice Cooper"));
    assert_eq!(incoming.kind, CallKind::Audio);

    wait_for_state(&mut alice.events, CallState::Active).await;
    alice.manager.end_call().await.expect("hangup");
    wait_for_ended(&mut alice.events).await;
    bob.stop().await.expect("stop");
}

#[tokio::test]
async fn test_stop_hangs_up_and_releases_identity() {
    init_logging();
    let hub = MemorySignalingHub::new();
    let mut alice = start_peer(&hub, "alice").await;
    let mut bob = start_peer(&hub, "bob").await;

    alice
        .manager
        .start_call(PeerId::from("bob"), CallKind::Audio)
        .await
        .expect("call should start");
    wait_for_state(&mut alice.events, CallState::Active).await;
    wait_for_state(&mut bob.events, CallState::Active).await;

    alice.manager.stop().await.expect("stop");

    // The live call was hung up on both sides and the identity freed.
    assert!(!alice.manager.is_running());
    assert_eq!(alice.manager.state(), CallState::Idle);
    assert_eq!(alice.device.closed(), alice.device.opened());
    assert!(!hub.is_bound(&PeerId::from("alice")));
    let ended = wait_for_ended(&mut bob.events).await;
    assert_eq!(ended.end_reason.as_deref(), Some("remote hangup"));

    // A stopped manager can come back and call again.
    alice.manager.start().await.expect("restart");
    assert!(hub.is_bound(&PeerId::from("alice")));
    alice
        .manager
        .start_call(PeerId::from("bob"), CallKind::Audio)
        .await
        .expect("call after restart");
    wait_for_state(&mut alice.events, CallState::Active).await;
    wait_for_state(&mut bob.events, CallState::Active).await;

    alice.manager.end_call().await.expect("hangup");
    wait_for_ended(&mut alice.events).await;

    // Calling while stopped is refused outright.
    alice.manager.stop().await.expect("stop again");
    let err = alice
        .manager
        .start_call(PeerId::from("bob"), CallKind::Audio)
        .await
        .expect_err("stopped manager cannot call");
    assert!(matches!(err, CallError::NotStarted));
}
