//! Loopback Call Example
//!
//! Runs two call session managers against the in-memory signaling hub and
//! walks a video call through its whole life: offer, answer, mute, hangup.
//! Everything stays inside this process; capture devices are mocks.
//!
//! Run with: cargo run --example loopback

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{sleep, timeout};
use tracing_subscriber::{EnvFilter, fmt};

use telecare_session_core::{
    CallEvent, CallKind, CallManagerBuilder, CallSessionManager, CallState, MemorySignalingHub,
    MockCaptureDevice, PeerId,
};

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("📞 Loopback Call Example");
    println!("========================\n");

    let hub = MemorySignalingHub::new();

    println!("🔧 Starting endpoints...");
    let alice = CallManagerBuilder::new("alice")
        .with_transport(hub.clone())
        .with_capture(Arc::new(MockCaptureDevice::new()))
        .build()?;
    let bob = CallManagerBuilder::new("bob")
        .with_transport(hub.clone())
        .with_capture(Arc::new(MockCaptureDevice::new()))
        .build()?;

    // Print every event each side sees.
    watch_events("alice", &alice);
    watch_events("bob", &bob);

    alice.start().await?;
    bob.start().await?;
    println!("   alice and bob are reachable on the hub\n");

    println!("🎥 alice calls bob (video)...");
    let call_id = alice
        .start_call(PeerId::from("bob"), CallKind::Video)
        .await?;
    println!("   call id: {call_id}");

    wait_for_state(&alice, CallState::Active).await?;
    wait_for_state(&bob, CallState::Active).await?;
    println!("\n✅ Call is active on both sides");

    let snapshot = alice.snapshot();
    println!(
        "   alice sees local stream: {}, remote stream: {}",
        snapshot.local_stream.is_some(),
        snapshot.remote_stream.is_some()
    );

    println!("\n🔇 alice mutes her microphone for a moment...");
    alice.set_muted(true);
    sleep(Duration::from_millis(300)).await;
    alice.set_muted(false);
    println!("   and unmutes");

    println!("\n👋 alice hangs up");
    alice.end_call().await?;

    wait_for_state(&alice, CallState::Idle).await?;
    wait_for_state(&bob, CallState::Idle).await?;
    println!("   both sides are idle again\n");

    let stats = alice.stats();
    println!(
        "📊 alice: {} call(s), {} connected, {} failed",
        stats.total_calls, stats.connected_calls, stats.failed_calls
    );

    alice.stop().await?;
    bob.stop().await?;
    println!("\n🏁 Done");
    Ok(())
}

/// Spawn a task that logs the event feed of one endpoint.
fn watch_events(name: &'static str, manager: &Arc<CallSessionManager>) {
    let mut events = manager.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CallEvent::IncomingCall(call) => {
                    println!("   [{name}] 📲 incoming {} call from {}", call.kind, call.from);
                }
                CallEvent::CallStateChanged {
                    previous,
                    new_state,
                    ..
                } => {
                    println!("   [{name}] state {previous} -> {new_state}");
                }
                CallEvent::CallFailed { error, .. } => {
                    println!("   [{name}] ❌ call failed: {error}");
                }
                CallEvent::CallEnded { info } => {
                    println!(
                        "   [{name}] call ended ({})",
                        info.end_reason.as_deref().unwrap_or("no reason")
                    );
                }
                CallEvent::IncomingCallRejected { peer, reason, .. } => {
                    println!("   [{name}] rejected {peer}: {reason}");
                }
            }
        }
    });
}

/// Poll until the manager reaches `target`, or give up after two seconds.
async fn wait_for_state(manager: &Arc<CallSessionManager>, target: CallState) -> Result<()> {
    timeout(Duration::from_secs(2), async {
        loop {
            if manager.state() == target {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for {target}"))
}
