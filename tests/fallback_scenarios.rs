//! Integration tests for the fallback path
//!
//! Denied permission, missing hardware, no ready signal and failed remote
//! verification all end in exactly one onVerified (or onFailed in strict mode).

mod common;

use common::{face, spawn_scripted, spawn_with, StubVerifier};
use facegate::core::{RemoteVerifier, Script, ScriptPermission};
use facegate::types::{
    FallbackPolicy, FireReason, ReasonCode, SessionOutcome, SessionState, VerificationKind, VerifyError,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

fn denied_location() -> Script {
    Script::new(VerificationKind::Location).permission(ScriptPermission::Denied)
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_falls_back_after_timeout_and_grace() {
    let s = spawn_scripted(denied_location(), FallbackPolicy::location());
    let report = s.handle.wait().await.unwrap();

    let verified = s.observer.verified();
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].0, 12000);
    assert_eq!(verified[0].1.via, FireReason::Fallback);

    assert_eq!(report.diagnostics, vec![VerifyError::PermissionDenied]);
    assert_eq!(report.final_state, SessionState::Resolved);
    assert_eq!(report.fallback_deadline_ms, Some(12000));
    assert_eq!(s.releases.load(Ordering::SeqCst), 1);

    let denied_status = s
        .observer
        .snapshot()
        .statuses
        .into_iter()
        .find(|(_, _, output)| output.reason == ReasonCode::V004_PERMISSION_DENIED)
        .map(|(_, snapshot, _)| snapshot);
    let denied_status = denied_status.expect("denial should push a status");
    assert_eq!(denied_status.check("permission_granted"), Some(false));
    assert!(!denied_status.ready_for_verification);
}

#[tokio::test(start_paused = true)]
async fn test_sample_mode_engages_fallback_immediately() {
    let policy = FallbackPolicy {
        sample_mode_enabled: true,
        ..FallbackPolicy::location()
    };
    let s = spawn_scripted(denied_location(), policy);
    let report = s.handle.wait().await.unwrap();

    assert_eq!(s.observer.verified().len(), 1);
    assert_eq!(report.resolved_at_ms, Some(2000));
    assert_eq!(report.fired_by, Some(FireReason::Fallback));
}

#[tokio::test(start_paused = true)]
async fn test_missing_camera_falls_back() {
    let script = Script::new(VerificationKind::Face).permission(ScriptPermission::Unavailable);
    let s = spawn_scripted(script, FallbackPolicy::face());
    let report = s.handle.wait().await.unwrap();

    assert_eq!(report.diagnostics, vec![VerifyError::HardwareUnavailable]);
    assert_eq!(report.resolved_at_ms, Some(12000));
    assert!(report.is_verified());
}

#[tokio::test(start_paused = true)]
async fn test_never_ready_is_bounded_by_timeout_plus_grace() {
    let policy = FallbackPolicy {
        total_timeout_ms: 4000,
        fallback_delay_ms: 1500,
        ..FallbackPolicy::face()
    };
    let worst_case = policy.worst_case_ms();
    let s = spawn_scripted(Script::new(VerificationKind::Face).every(0, 30000, 100, face(0)), policy);
    let report = s.handle.wait().await.unwrap();

    let verified = s.observer.verified();
    assert_eq!(verified.len(), 1);
    assert!(verified[0].0 <= worst_case);
    assert_eq!(report.diagnostics, vec![VerifyError::NoSignalWithinTimeout(4000)]);
}

#[tokio::test(start_paused = true)]
async fn test_strict_mode_ends_in_failure() {
    let policy = FallbackPolicy {
        sample_mode_enabled: true,
        strict_mode: true,
        ..FallbackPolicy::location()
    };
    let s = spawn_scripted(denied_location(), policy);
    let report = s.handle.wait().await.unwrap();

    let recorded = s.observer.snapshot();
    assert!(recorded.verified.is_empty());
    assert_eq!(recorded.failed.len(), 1);
    assert_eq!(recorded.failed[0].1.cause, VerifyError::PermissionDenied);
    assert_eq!(report.final_state, SessionState::FailedFallback);
    assert!(matches!(report.outcome, Some(SessionOutcome::Failed(_))));
}

/// Stable at 600ms, remote rejects twice (600, 1600), grace runs to 3600ms
#[tokio::test(start_paused = true)]
async fn test_remote_rejections_hand_over_to_fallback() {
    let verifier = StubVerifier::new(false, Duration::ZERO);
    let s = spawn_with(
        Script::new(VerificationKind::Face).every(0, 5000, 100, face(1)),
        FallbackPolicy::face(),
        Some(verifier.clone() as Arc<dyn RemoteVerifier>),
    );
    let report = s.handle.wait().await.unwrap();

    assert_eq!(verifier.call_times(), vec![600, 1600]);
    assert_eq!(
        report.diagnostics,
        vec![
            VerifyError::RemoteVerifyFailed("face mismatch".into()),
            VerifyError::RemoteVerifyFailed("face mismatch".into()),
        ]
    );
    assert_eq!(report.fired_by, Some(FireReason::Stable));
    let verified = s.observer.verified();
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].0, 3600);
    assert_eq!(verified[0].1.via, FireReason::Fallback);
}

#[tokio::test(start_paused = true)]
async fn test_remote_success_resolves_via_primary_path() {
    let verifier = StubVerifier::new(true, Duration::from_millis(300));
    let s = spawn_with(
        Script::new(VerificationKind::Face).every(0, 5000, 100, face(1)),
        FallbackPolicy::face(),
        Some(verifier.clone() as Arc<dyn RemoteVerifier>),
    );
    let report = s.handle.wait().await.unwrap();

    assert_eq!(verifier.call_times(), vec![600]);
    assert_eq!(report.triggered_at_ms, Some(600));
    assert_eq!(report.resolved_at_ms, Some(900));
    let verified = s.observer.verified();
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].1.via, FireReason::Stable);
}

/// Remote call outlives the total timeout: the fallback takes over, once
#[tokio::test(start_paused = true)]
async fn test_slow_remote_overtaken_by_fallback_fires_once() {
    let verifier = StubVerifier::new(true, Duration::from_secs(30));
    let s = spawn_with(
        Script::new(VerificationKind::Face).every(0, 5000, 100, face(1)),
        FallbackPolicy::face(),
        Some(verifier.clone() as Arc<dyn RemoteVerifier>),
    );
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(s.handle.state(), SessionState::Verifying);
    assert!(s.handle.fire());
    assert!(s.handle.fire());

    let report = s.handle.wait().await.unwrap();
    sleep(Duration::from_secs(60)).await;

    assert_eq!(report.fired_by, Some(FireReason::Stable));
    assert_eq!(report.resolved_at_ms, Some(12000));
    let verified = s.observer.verified();
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].1.via, FireReason::Fallback);
    assert_eq!(verifier.call_times().len(), 1);
    assert_eq!(
        report.diagnostics,
        vec![VerifyError::RemoteVerifyFailed("no verdict within 10000ms".into())]
    );
}

/// A late verdict is a remote problem, not a missing signal
#[tokio::test(start_paused = true)]
async fn test_strict_slow_remote_fails_with_remote_cause() {
    let verifier = StubVerifier::new(true, Duration::from_secs(30));
    let policy = FallbackPolicy {
        strict_mode: true,
        ..FallbackPolicy::face()
    };
    let s = spawn_with(
        Script::new(VerificationKind::Face).every(0, 5000, 100, face(1)),
        policy,
        Some(verifier.clone() as Arc<dyn RemoteVerifier>),
    );
    let report = s.handle.wait().await.unwrap();

    let recorded = s.observer.snapshot();
    assert!(recorded.verified.is_empty());
    assert_eq!(recorded.failed.len(), 1);
    assert_eq!(
        recorded.failed[0].1.cause,
        VerifyError::RemoteVerifyFailed("no verdict within 10000ms".into())
    );
    assert!(!report
        .diagnostics
        .iter()
        .any(|e| matches!(e, VerifyError::NoSignalWithinTimeout(_))));
    assert_eq!(report.final_state, SessionState::FailedFallback);
}
