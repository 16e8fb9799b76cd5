//! Integration tests for the session state machine, driven through the
//! registry with scripted transports.

mod common;

use std::time::Duration;

use futures::future::join_all;

use relayd::session::{InitializeOutcome, SessionPhase, SessionSettings};
use relayd::transport::TransportEvent;

use common::{TestRig, test_settings, wait_for_phase, wait_until};

// ============================================================================
// Initialization
// ============================================================================

#[tokio::test]
async fn concurrent_initialize_constructs_once() {
    let rig = TestRig::new();

    let outcomes = join_all((0..8).map(|_| rig.registry.initialize("shop"))).await;
    let outcomes: Vec<_> = outcomes.into_iter().map(Result::unwrap).collect();

    let started = outcomes
        .iter()
        .filter(|o| **o == InitializeOutcome::Started)
        .count();
    assert_eq!(started, 1, "outcomes: {outcomes:?}");

    wait_until("attempt to finish", || rig.log.contains("initialize:1")).await;
    rig.settle("shop").await;

    assert_eq!(rig.factory.constructions(), 1);
    assert_eq!(rig.log.count("reset:shop"), 1);
}

#[tokio::test]
async fn sessions_are_independent() {
    let rig = TestRig::new();

    rig.registry.initialize("a").await.unwrap();
    rig.registry.initialize("b").await.unwrap();
    wait_until("both constructions", || rig.factory.constructions() == 2).await;

    assert_eq!(rig.log.count("reset:a"), 1);
    assert_eq!(rig.log.count("reset:b"), 1);
    assert_eq!(
        rig.registry
            .list()
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>(),
        vec!["a", "b"]
    );
}

#[tokio::test]
async fn initialize_while_connected_is_noop() {
    let rig = TestRig::new();
    rig.connect("shop", 1).await;

    let outcome = rig.registry.initialize("shop").await.unwrap();

    assert_eq!(outcome, InitializeOutcome::AlreadyActive);
    assert_eq!(rig.factory.constructions(), 1);
    assert_eq!(rig.log.count("reset:shop"), 1);
}

#[tokio::test]
async fn reset_failure_does_not_block_initialization() {
    let rig = TestRig::new();
    rig.auth.fail_resets();

    rig.connect("shop", 1).await;

    let status = rig.registry.status("shop").await.unwrap();
    assert!(status.connected);
}

// ============================================================================
// Provisioning flow
// ============================================================================

#[tokio::test]
async fn code_then_authenticated_then_ready() {
    let rig = TestRig::new();
    rig.registry.initialize("shop").await.unwrap();
    let events = rig.factory.sink(1).await;
    let handle = rig.handle("shop");

    events
        .emit(TransportEvent::CodeIssued("2@first".into()))
        .await;
    wait_for_phase(&handle, SessionPhase::AwaitingCode).await;
    let status = rig.registry.status("shop").await.unwrap();
    assert!(status.has_code);
    assert!(!status.connected);

    // A refreshed code replaces the old one.
    events
        .emit(TransportEvent::CodeIssued("2@second".into()))
        .await;
    rig.settle("shop").await;
    assert_eq!(rig.registry.current_code("shop").unwrap(), "2@second");

    events.emit(TransportEvent::Authenticated).await;
    wait_for_phase(&handle, SessionPhase::Authenticated).await;
    assert!(!rig.registry.qr_cache().contains(handle.id()));
    assert!(!handle.view().connected);

    events.emit(TransportEvent::Ready).await;
    wait_for_phase(&handle, SessionPhase::Connected).await;
    let status = rig.registry.status("shop").await.unwrap();
    assert!(status.connected);
    assert!(!status.has_code);
}

#[tokio::test]
async fn connected_never_coexists_with_code() {
    let rig = TestRig::new();
    rig.registry.initialize("shop").await.unwrap();
    let events = rig.factory.sink(1).await;
    let handle = rig.handle("shop");
    let qr = rig.registry.qr_cache().clone();

    let mut views = handle.subscribe();
    let checker = tokio::spawn({
        let id = handle.id().clone();
        async move {
            while views.changed().await.is_ok() {
                let connected = views.borrow_and_update().connected;
                assert!(!(connected && qr.contains(&id)));
            }
        }
    });

    events.emit(TransportEvent::CodeIssued("2@a".into())).await;
    events.emit(TransportEvent::Ready).await;
    events.emit(TransportEvent::CodeIssued("2@late".into())).await;
    let view = rig.settle("shop").await;

    assert_eq!(view.phase, SessionPhase::Connected);
    assert!(!rig.registry.qr_cache().contains(handle.id()));

    rig.registry.shutdown().await;
    checker.await.unwrap();
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn disconnect_event_rebuilds_transport_before_connecting() {
    let rig = TestRig::new();
    rig.connect("shop", 1).await;
    let old_events = rig.factory.sink(1).await;
    let handle = rig.handle("shop");

    old_events
        .emit(TransportEvent::Disconnected("NAVIGATION".into()))
        .await;
    wait_for_phase(&handle, SessionPhase::Disconnected).await;
    assert!(!handle.view().connected);

    // A late event from the dead transport must not revive the session.
    old_events.emit(TransportEvent::Ready).await;
    let view = rig.settle("shop").await;
    assert_eq!(view.phase, SessionPhase::Disconnected);

    // The retry fires after `retry_delay` and builds a fresh transport.
    let new_events = rig.factory.sink(2).await;
    wait_until("second attempt", || rig.log.contains("initialize:2")).await;

    old_events.emit(TransportEvent::Ready).await;
    let view = rig.settle("shop").await;
    assert_ne!(view.phase, SessionPhase::Connected);

    new_events.emit(TransportEvent::Ready).await;
    wait_for_phase(&handle, SessionPhase::Connected).await;

    let destroy = rig.log.position("destroy:1").expect("old transport destroyed");
    let construct = rig.log.position("construct:2").expect("new transport built");
    let reset = rig
        .log
        .last_before("reset:shop", construct)
        .expect("reset before rebuild");
    assert!(destroy < reset, "log: {:?}", rig.log.entries());
    assert!(reset < construct, "log: {:?}", rig.log.entries());
}

#[tokio::test(start_paused = true)]
async fn auth_failure_resets_and_retries() {
    let rig = TestRig::new();
    rig.registry.initialize("shop").await.unwrap();
    let handle = rig.handle("shop");

    rig.factory
        .sink(1)
        .await
        .emit(TransportEvent::AuthFailure("bad credentials".into()))
        .await;
    wait_for_phase(&handle, SessionPhase::Failed).await;

    rig.factory.sink(2).await;
    // attempt reset, recovery reset, retry attempt reset
    assert_eq!(rig.log.count("reset:shop"), 3);
    assert!(rig.log.contains("destroy:1"));
}

#[tokio::test(start_paused = true)]
async fn construction_error_retries_after_longer_delay() {
    let rig = TestRig::new();
    rig.factory.fail_constructions(1);

    rig.registry.initialize("shop").await.unwrap();
    let handle = rig.handle("shop");
    wait_for_phase(&handle, SessionPhase::Failed).await;
    assert_eq!(rig.factory.constructions(), 1);

    // Past the short delay, still before the construction error delay.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(rig.factory.constructions(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    wait_until("retry construction", || rig.factory.constructions() == 2).await;

    rig.factory.sink(1).await.emit(TransportEvent::Ready).await;
    wait_for_phase(&handle, SessionPhase::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn retry_cap_leaves_session_failed() {
    let rig = TestRig::with_settings(SessionSettings {
        max_retry_attempts: Some(2),
        ..test_settings()
    });
    rig.factory.fail_constructions(10);

    rig.registry.initialize("shop").await.unwrap();
    wait_until("retries exhausted", || rig.factory.constructions() == 3).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(rig.factory.constructions(), 3);
    assert_eq!(rig.handle("shop").view().phase, SessionPhase::Failed);
}

// ============================================================================
// Disconnect and shutdown
// ============================================================================

#[tokio::test]
async fn disconnect_destroys_then_resets_and_goes_idle() {
    let rig = TestRig::new();
    rig.connect("shop", 1).await;

    rig.registry.disconnect("shop").await.unwrap();

    let view = rig.handle("shop").view();
    assert_eq!(view.phase, SessionPhase::Idle);
    assert!(!view.connected);
    assert!(view.transport.is_none());

    let entries = rig.log.entries();
    let destroy = rig.log.position("destroy:1").unwrap();
    let last_reset = entries.iter().rposition(|e| e == "reset:shop").unwrap();
    assert!(destroy < last_reset, "log: {entries:?}");
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_retry() {
    let rig = TestRig::new();
    rig.connect("shop", 1).await;
    let handle = rig.handle("shop");

    rig.factory
        .sink(1)
        .await
        .emit(TransportEvent::Disconnected("LOGOUT".into()))
        .await;
    wait_for_phase(&handle, SessionPhase::Disconnected).await;

    rig.registry.disconnect("shop").await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(rig.factory.constructions(), 1);
    assert_eq!(handle.view().phase, SessionPhase::Idle);
}

#[tokio::test]
async fn disconnect_unknown_session_ends_idle() {
    let rig = TestRig::new();

    rig.registry.disconnect("never-seen").await.unwrap();

    assert_eq!(rig.handle("never-seen").view().phase, SessionPhase::Idle);
    assert_eq!(rig.factory.constructions(), 0);
}

#[tokio::test]
async fn session_can_be_reinitialized_after_disconnect() {
    let rig = TestRig::new();
    rig.connect("shop", 1).await;
    rig.registry.disconnect("shop").await.unwrap();

    rig.connect("shop", 2).await;

    assert!(rig.registry.status("shop").await.unwrap().connected);
}

#[tokio::test]
async fn shutdown_destroys_without_reset() {
    let rig = TestRig::new();
    rig.connect("shop", 1).await;
    let resets = rig.log.count("reset:");

    rig.registry.shutdown().await;

    assert!(rig.log.contains("destroy:1"));
    assert_eq!(rig.log.count("reset:"), resets);
    assert!(!rig.handle("shop").is_alive());
}
