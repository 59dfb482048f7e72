//! Integration tests for unmount and resource release

mod common;

use common::{face, spawn_scripted, spawn_with, RecordingObserver, StubVerifier};
use facegate::core::{DeviceCapability, RemoteVerifier, Script, SessionConfig, VerificationSession};
use facegate::types::{FallbackPolicy, FireReason, SessionState, VerificationKind};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

fn ready_face() -> Script {
    Script::new(VerificationKind::Face).every(0, 5000, 100, face(1))
}

#[tokio::test(start_paused = true)]
async fn test_unmount_while_stabilizing() {
    let s = spawn_scripted(ready_face(), FallbackPolicy::face());
    sleep(Duration::from_millis(300)).await;
    assert_eq!(s.handle.state(), SessionState::Stabilizing);

    s.handle.unmount();
    let seen = s.observer.callback_count();
    let report = s.handle.wait().await.unwrap();
    sleep(Duration::from_secs(20)).await;

    assert!(report.unmounted);
    assert_eq!(report.final_state, SessionState::Stabilizing);
    assert!(report.outcome.is_none());
    assert_eq!(s.observer.callback_count(), seen);
    assert!(s.observer.verified().is_empty());
    assert_eq!(s.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unmount_while_verifying() {
    let verifier = StubVerifier::new(true, Duration::from_secs(5));
    let s = spawn_with(
        ready_face(),
        FallbackPolicy::face(),
        Some(verifier.clone() as Arc<dyn RemoteVerifier>),
    );
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(s.handle.state(), SessionState::Verifying);

    s.handle.unmount();
    let seen = s.observer.callback_count();
    let report = s.handle.wait().await.unwrap();
    sleep(Duration::from_secs(20)).await;

    assert!(report.unmounted);
    assert_eq!(report.final_state, SessionState::Verifying);
    assert_eq!(report.fired_by, Some(FireReason::Stable));
    assert!(report.resolved_at_ms.is_none());
    assert_eq!(s.observer.callback_count(), seen);
    assert_eq!(verifier.call_times(), vec![600]);
    assert_eq!(s.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_unmounts() {
    let s = spawn_scripted(ready_face(), FallbackPolicy::face());
    let observer = s.observer.clone();
    let releases = s.releases.clone();
    sleep(Duration::from_millis(300)).await;

    drop(s.handle);
    sleep(Duration::from_secs(20)).await;

    assert!(observer.verified().is_empty());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unmount_is_idempotent() {
    let s = spawn_scripted(ready_face(), FallbackPolicy::face());
    sleep(Duration::from_millis(100)).await;

    s.handle.unmount();
    s.handle.unmount();
    assert!(!s.handle.is_mounted());
    assert!(!s.handle.fire());
    let report = s.handle.wait().await.unwrap();

    assert!(report.unmounted);
    assert_eq!(s.releases.load(Ordering::SeqCst), 1);
}

/// Released even while the permission prompt is still open
#[tokio::test(start_paused = true)]
async fn test_unmount_before_permission_releases_device() {
    let (capability, feed) = DeviceCapability::new(VerificationKind::Face);
    let observer = RecordingObserver::new();
    let handle = VerificationSession::spawn(SessionConfig::new(Box::new(capability), observer.clone())).unwrap();
    sleep(Duration::from_millis(500)).await;
    assert_eq!(handle.state(), SessionState::Acquiring);
    assert!(!feed.is_released());

    handle.unmount();
    let report = handle.wait().await.unwrap();

    assert!(report.unmounted);
    assert!(feed.is_released());
    assert!(observer.verified().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resolved_session_releases_source() {
    let s = spawn_scripted(Script::new(VerificationKind::Face).every(0, 700, 100, face(1)), FallbackPolicy::face());
    let report = s.handle.wait().await.unwrap();

    assert!(!report.unmounted);
    assert_eq!(s.releases.load(Ordering::SeqCst), 1);
}
