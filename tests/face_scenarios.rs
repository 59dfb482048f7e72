//! Integration tests for the primary path
//!
//! Scripted device → evaluator → stability timer → trigger → onVerified,
//! all on tokio's paused clock so timings are exact.

mod common;

use common::{face, spawn_scripted};
use facegate::core::{Script, ScriptSignal};
use facegate::types::{FallbackPolicy, FireReason, ReasonCode, SessionState, VerificationKind, VerifyError};
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use tokio::time::{sleep, Duration};

fn face_script() -> Script {
    Script::new(VerificationKind::Face)
}

/// Face ready every 100ms from 0 to 700ms
#[tokio::test(start_paused = true)]
async fn test_happy_path_fires_once_after_dwell() {
    let s = spawn_scripted(face_script().every(0, 700, 100, face(1)), FallbackPolicy::face());
    let report = s.handle.wait().await.unwrap();

    let verified = s.observer.verified();
    assert_eq!(verified.len(), 1);
    let (at, event) = &verified[0];
    assert!((600..=800).contains(at), "verified at {}ms", at);
    assert_eq!(event.via, FireReason::Stable);

    assert_eq!(
        s.observer.states(),
        vec![
            SessionState::Acquiring,
            SessionState::Stabilizing,
            SessionState::Verifying,
            SessionState::Resolved,
        ]
    );
    assert_eq!(report.final_state, SessionState::Resolved);
    assert_eq!(report.fired_by, Some(FireReason::Stable));
    assert!(report.is_verified());
    assert!(report.diagnostics.is_empty());
    assert_eq!(s.releases.load(Ordering::SeqCst), 1);
}

/// Flicker at 450ms resets the streak; promotion only after 500 + 600ms
#[tokio::test(start_paused = true)]
async fn test_flicker_resets_dwell() {
    let script = face_script()
        .every(0, 400, 100, face(1))
        .at(450, face(0))
        .every(500, 1100, 100, face(1));
    let s = spawn_scripted(script, FallbackPolicy::face());
    let report = s.handle.wait().await.unwrap();

    let verified = s.observer.verified();
    assert_eq!(verified.len(), 1);
    assert!((1100..=1200).contains(&verified[0].0), "verified at {}ms", verified[0].0);
    assert_eq!(report.fired_by, Some(FireReason::Stable));

    let reset = s
        .observer
        .snapshot()
        .statuses
        .iter()
        .any(|(_, _, output)| output.reason == ReasonCode::V003_STABILITY_RESET);
    assert!(reset, "flicker should push a reset status");
}

/// Ready for less than the dwell, then lost: only the fallback can finish
#[tokio::test(start_paused = true)]
async fn test_ready_shorter_than_dwell_does_not_promote() {
    let script = face_script().at(0, face(1)).at(599, face(0));
    let s = spawn_scripted(script, FallbackPolicy::face());
    let report = s.handle.wait().await.unwrap();

    assert_eq!(report.fired_by, Some(FireReason::Fallback));
    let verified = s.observer.verified();
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].1.via, FireReason::Fallback);
    assert_eq!(verified[0].0, 12000);
}

/// Ready held past the dwell promotes even if lost right after
#[tokio::test(start_paused = true)]
async fn test_ready_past_dwell_promotes() {
    let script = face_script().at(0, face(1)).at(650, face(0));
    let s = spawn_scripted(script, FallbackPolicy::face());
    let report = s.handle.wait().await.unwrap();

    assert_eq!(report.fired_by, Some(FireReason::Stable));
    assert_eq!(report.triggered_at_ms, Some(600));
}

#[tokio::test(start_paused = true)]
async fn test_manual_fire_beats_stability() {
    let s = spawn_scripted(face_script().every(0, 2000, 100, face(1)), FallbackPolicy::face());
    sleep(Duration::from_millis(300)).await;
    assert!(s.handle.fire());
    let report = s.handle.wait().await.unwrap();

    assert_eq!(report.fired_by, Some(FireReason::Manual));
    assert_eq!(report.triggered_at_ms, Some(300));
    let verified = s.observer.verified();
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].1.via, FireReason::Manual);
}

#[tokio::test(start_paused = true)]
async fn test_fire_after_resolution_is_ignored() {
    let s = spawn_scripted(face_script().every(0, 700, 100, face(1)), FallbackPolicy::face());
    sleep(Duration::from_millis(1000)).await;

    assert_eq!(s.handle.state(), SessionState::Resolved);
    assert!(!s.handle.fire());
    assert!(!s.handle.fire());
    sleep(Duration::from_millis(20000)).await;
    assert_eq!(s.observer.verified().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_session_gets_fresh_latch() {
    let first = spawn_scripted(face_script().every(0, 700, 100, face(1)), FallbackPolicy::face());
    let first_report = first.handle.wait().await.unwrap();

    let second = spawn_scripted(face_script().every(0, 700, 100, face(1)), FallbackPolicy::face());
    let second_report = second.handle.wait().await.unwrap();

    assert!(first_report.is_verified());
    assert!(second_report.is_verified());
    assert_ne!(first_report.session_id, second_report.session_id);
    assert_eq!(first.observer.verified().len(), 1);
    assert_eq!(second.observer.verified().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_status_pushed_on_every_tick() {
    let s = spawn_scripted(face_script().every(0, 300, 100, face(0)), FallbackPolicy::face());
    sleep(Duration::from_millis(350)).await;

    let recorded = s.observer.snapshot();
    // initial prompt + four ticks
    assert_eq!(recorded.statuses.len(), 5);
    assert!(recorded
        .statuses
        .iter()
        .all(|(_, snapshot, _)| snapshot.message == "Position your face in the oval"));
    s.handle.unmount();
}

#[tokio::test(start_paused = true)]
async fn test_location_fix_promotes_after_location_dwell() {
    let script = Script::new(VerificationKind::Location).every(
        0,
        3000,
        500,
        ScriptSignal::Fix { latitude: 12.97, longitude: 77.59, accuracy_m: 20.0 },
    );
    let s = spawn_scripted(script, FallbackPolicy::location());
    let report = s.handle.wait().await.unwrap();

    assert_eq!(report.fired_by, Some(FireReason::Stable));
    assert_eq!(report.triggered_at_ms, Some(2000));
    assert!(report.diagnostics.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_location_without_fix_reports_and_falls_back() {
    let script = Script::new(VerificationKind::Location).every(0, 20000, 1000, ScriptSignal::NoFix);
    let s = spawn_scripted(script, FallbackPolicy::location());
    let report = s.handle.wait().await.unwrap();

    assert_eq!(
        report.diagnostics,
        vec![VerifyError::NoSignalWithinTimeout(5000), VerifyError::NoSignalWithinTimeout(10000)]
    );
    assert_eq!(s.observer.diagnostics(), report.diagnostics);
    assert_eq!(report.fired_by, Some(FireReason::Fallback));
    assert_eq!(report.resolved_at_ms, Some(12000));
}

#[tokio::test(start_paused = true)]
async fn test_inaccurate_fix_cancels_signal_timeout() {
    let script = Script::new(VerificationKind::Location).every(
        0,
        20000,
        1000,
        ScriptSignal::Fix { latitude: 12.97, longitude: 77.59, accuracy_m: 500.0 },
    );
    let s = spawn_scripted(script, FallbackPolicy::location());
    let report = s.handle.wait().await.unwrap();

    assert_eq!(report.diagnostics, vec![VerifyError::NoSignalWithinTimeout(10000)]);
    assert_eq!(report.fired_by, Some(FireReason::Fallback));
}
