//! Verification session: the orchestrator event loop
//!
//! Each session is one tokio task. Everything that can change session state
//! (source events, the stability timer, the fallback controller, an in-flight
//! remote verification, host commands) is a branch of one `select!`, so all
//! transitions happen one at a time on that task and the latches need no
//! locking.
//!
//! ```text
//! IDLE → ACQUIRING ⇄ STABILIZING → VERIFYING → RESOLVED
//!          │  permission denied / unavailable / no ready signal
//!          └──────────── fallback timer ──────→ VERIFYING → RESOLVED
//!                                   (strict mode) → FAILED_FALLBACK
//! ```
//!
//! The liveness flag is flipped synchronously by `SessionHandle::unmount`;
//! every observer callback checks it first, so nothing reaches the host
//! after unmount even if the loop has not yet seen the command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::SIGNAL_BUFFER;
use crate::core::capability::{Capability, SignalSource};
use crate::core::evaluator::{default_evaluator, Evaluator};
use crate::core::fallback::{FallbackController, FallbackEvent};
use crate::core::observer::VerificationObserver;
use crate::core::stability::StabilityTimer;
use crate::core::timer::CancellableTimer;
use crate::core::trigger::VerificationTrigger;
use crate::core::verifier::{verify_with_retries, RemoteOutcome, RemoteVerifier, VerifyRequest};
use crate::types::{
    ConfigError, FallbackPolicy, FireReason, RawSignal, ReasonCode, SessionFailure, SessionOutcome,
    SessionReport, SessionState, SourceEvent, StatusOutput, StatusSnapshot, VerificationKind,
    Verified, VerifyError,
};

/// Everything a session needs, fixed at creation
pub struct SessionConfig {
    pub policy: FallbackPolicy,
    pub capability: Box<dyn Capability>,
    pub evaluator: Option<Box<dyn Evaluator>>,
    pub verifier: Option<Arc<dyn RemoteVerifier>>,
    pub observer: Arc<dyn VerificationObserver>,
}

impl SessionConfig {
    /// Variant defaults for the capability's kind, default evaluator, local verification
    pub fn new(capability: Box<dyn Capability>, observer: Arc<dyn VerificationObserver>) -> Self {
        Self {
            policy: FallbackPolicy::for_kind(capability.kind()),
            capability,
            evaluator: None,
            verifier: None,
            observer,
        }
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Box<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn RemoteVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }
}

#[derive(Debug)]
enum SessionCommand {
    Fire,
    Unmount,
}

/// Host-side handle; dropping it unmounts the session
pub struct SessionHandle {
    id: Uuid,
    kind: VerificationKind,
    commands: mpsc::UnboundedSender<SessionCommand>,
    mounted: Arc<AtomicBool>,
    state: watch::Receiver<SessionState>,
    task: Option<JoinHandle<SessionReport>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &*self.state.borrow())
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> VerificationKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Ask to verify now. Goes through the same latch as every other path;
    /// returns false if the session is gone.
    pub fn fire(&self) -> bool {
        if !self.is_mounted() {
            warn!(session_id = %self.id, "fire on unmounted session ignored");
            return false;
        }
        self.commands.send(SessionCommand::Fire).is_ok()
    }

    /// Tear the session down: no callbacks after this returns, source
    /// released and timers cancelled once the loop sees the command
    pub fn unmount(&self) {
        if self.mounted.swap(false, Ordering::AcqRel) {
            debug!(session_id = %self.id, "unmounting");
            let _ = self.commands.send(SessionCommand::Unmount);
        }
    }

    /// Wait for the session task to end and return its report
    pub async fn wait(mut self) -> Option<SessionReport> {
        let task = self.task.take()?;
        match task.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(session_id = %self.id, error = %e, "session task failed");
                None
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn next_outcome(slot: &mut Option<BoxFuture<'static, RemoteOutcome>>) -> RemoteOutcome {
    match slot.as_mut() {
        Some(pending) => pending.await,
        None => std::future::pending().await,
    }
}

/// One verification attempt, owned by its task
pub struct VerificationSession {
    id: Uuid,
    kind: VerificationKind,
    policy: FallbackPolicy,
    state: SessionState,
    started_at: Instant,

    source: SignalSource,
    evaluator: Box<dyn Evaluator>,
    stability: StabilityTimer,
    fallback: FallbackController,
    trigger: VerificationTrigger,
    signal_timer: CancellableTimer,

    verifier: Option<Arc<dyn RemoteVerifier>>,
    pending_verify: Option<BoxFuture<'static, RemoteOutcome>>,

    observer: Arc<dyn VerificationObserver>,
    mounted: Arc<AtomicBool>,
    state_tx: watch::Sender<SessionState>,

    last_signal: Option<RawSignal>,
    last_snapshot: StatusSnapshot,
    fallback_deadline: Option<Instant>,
    outcome: Option<SessionOutcome>,
    diagnostics: Vec<VerifyError>,
}

impl VerificationSession {
    /// Validate the config and start the session task
    pub fn spawn(config: SessionConfig) -> Result<SessionHandle, ConfigError> {
        config.policy.validate()?;
        let kind = config.capability.kind();
        let evaluator = match config.evaluator {
            Some(evaluator) => evaluator,
            None => default_evaluator(kind, config.policy.accuracy_threshold_m),
        };
        if evaluator.kind() != kind {
            return Err(ConfigError::KindMismatch {
                component: "evaluator",
                expected: kind,
                got: evaluator.kind(),
            });
        }

        let id = Uuid::new_v4();
        let mounted = Arc::new(AtomicBool::new(true));
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let session = Self {
            id,
            kind,
            stability: StabilityTimer::new(config.policy.dwell()),
            fallback: FallbackController::new(&config.policy),
            policy: config.policy,
            state: SessionState::Idle,
            started_at: Instant::now(),
            source: SignalSource::new(config.capability),
            last_snapshot: evaluator.initial(),
            evaluator,
            trigger: VerificationTrigger::new(),
            signal_timer: CancellableTimer::new(),
            verifier: config.verifier,
            pending_verify: None,
            observer: config.observer,
            mounted: mounted.clone(),
            state_tx,
            last_signal: None,
            fallback_deadline: None,
            outcome: None,
            diagnostics: Vec::new(),
        };
        let task = tokio::spawn(session.run(command_rx));

        Ok(SessionHandle {
            id,
            kind,
            commands: command_tx,
            mounted,
            state: state_rx,
            task: Some(task),
        })
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) -> SessionReport {
        let (sink, mut events) = mpsc::channel(SIGNAL_BUFFER);
        self.started_at = Instant::now();
        info!(session_id = %self.id, kind = %self.kind, dwell_ms = self.policy.dwell_ms,
            total_timeout_ms = self.policy.total_timeout_ms, "session started");

        self.fallback.arm();
        self.fallback_deadline = self.fallback.deadline();
        if let Some(ms) = self.policy.signal_timeout_ms {
            self.signal_timer.arm(Duration::from_millis(ms));
        }
        if let Err(e) = self.source.start(sink) {
            self.defect(&format!("signal source failed to start: {}", e));
        }
        self.transition(SessionState::Acquiring, ReasonCode::V002_STATE_ACQUIRING);

        let mut source_open = true;
        let mut unmounted = false;

        while !self.state.is_terminal() {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(SessionCommand::Fire) => self.fire_primary(FireReason::Manual),
                    Some(SessionCommand::Unmount) | None => {
                        unmounted = true;
                        break;
                    }
                },

                event = events.recv(), if source_open => match event {
                    Some(event) => self.on_source_event(event),
                    None => {
                        debug!(session_id = %self.id, "source closed");
                        source_open = false;
                    }
                },

                _ = self.stability.promoted() => self.on_stable(),

                outcome = next_outcome(&mut self.pending_verify) => {
                    self.pending_verify = None;
                    self.on_remote_outcome(outcome);
                }

                event = self.fallback.next() => self.on_fallback(event),

                _ = self.signal_timer.expired() => self.on_signal_timeout(),
            }
        }

        self.teardown().await;
        if unmounted {
            info!(session_id = %self.id, state = %self.state, "session unmounted");
        }
        self.report(unmounted)
    }

    // =========================================================================
    // Event handlers
    // =========================================================================

    fn on_source_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::PermissionGranted => {
                debug!(session_id = %self.id, "permission granted");
            }
            SourceEvent::Signal(signal) => self.on_signal(signal),
            SourceEvent::PermissionDenied => {
                self.on_degraded(VerifyError::PermissionDenied, ReasonCode::V004_PERMISSION_DENIED)
            }
            SourceEvent::Unavailable => {
                self.on_degraded(VerifyError::HardwareUnavailable, ReasonCode::V004_HARDWARE_UNAVAILABLE)
            }
        }
    }

    fn on_signal(&mut self, signal: RawSignal) {
        let snapshot = self.evaluator.evaluate(&signal);
        if snapshot.primary_signal_present {
            self.signal_timer.cancel();
        }
        self.last_signal = Some(signal);

        if self.trigger.is_fired() {
            // Readiness no longer matters, keep the UI current
            let reason = ReasonCode::for_state(self.state);
            self.publish_status(snapshot, reason);
            return;
        }

        let ready = snapshot.ready_for_verification;
        let change = self.stability.observe(ready);
        let next = if self.stability.is_pending() {
            SessionState::Stabilizing
        } else {
            SessionState::Acquiring
        };
        self.set_state(next);
        self.publish_status(snapshot, change.reason(ready));
    }

    fn on_stable(&mut self) {
        info!(session_id = %self.id, reason = ReasonCode::V003_STABILITY_REACHED.code(),
            dwell_ms = self.policy.dwell_ms, "readiness stable");
        self.fire_primary(FireReason::Stable);
    }

    fn on_degraded(&mut self, error: VerifyError, reason: ReasonCode) {
        warn!(session_id = %self.id, reason = reason.code(), "source degraded");
        self.diagnose(error.clone());
        self.stability.cancel();
        self.signal_timer.cancel();
        if !self.trigger.is_fired() {
            self.set_state(SessionState::Acquiring);
        }
        let snapshot = self.evaluator.degraded(&error);
        self.publish_status(snapshot, reason);
        if self.fallback.on_degraded(error) {
            self.fallback_deadline = self.fallback.deadline();
        }
    }

    fn on_signal_timeout(&mut self) {
        let waited = self.policy.signal_timeout_ms.unwrap_or_default();
        warn!(session_id = %self.id, waited_ms = waited, "no signal within local timeout");
        self.diagnose(VerifyError::NoSignalWithinTimeout(waited));
        let snapshot = self.evaluator.stalled();
        self.publish_status(snapshot, ReasonCode::V004_NO_SIGNAL);
    }

    fn on_remote_outcome(&mut self, outcome: RemoteOutcome) {
        for error in outcome.errors {
            self.diagnose(error);
        }
        if outcome.verified {
            info!(session_id = %self.id, reason = ReasonCode::V006_REMOTE_VERIFIED.code(),
                attempts = outcome.attempts, "remote verification passed");
            let via = self.trigger.fired_by().unwrap_or(FireReason::Stable);
            self.resolve(via);
        } else {
            warn!(session_id = %self.id, reason = ReasonCode::V006_REMOTE_REJECTED.code(),
                attempts = outcome.attempts, "remote verification exhausted, handing to fallback");
            let cause = VerifyError::RemoteVerifyFailed(format!("{} attempts exhausted", outcome.attempts));
            if self.fallback.engage(cause) {
                self.fallback_deadline = self.fallback.deadline();
            }
        }
    }

    fn on_fallback(&mut self, event: FallbackEvent) {
        match event {
            FallbackEvent::TimedOut => {
                // Primary path already fired: the signal was fine, the verdict is late
                let cause = if self.pending_verify.is_some() {
                    let cause = VerifyError::RemoteVerifyFailed(format!(
                        "no verdict within {}ms",
                        self.policy.total_timeout_ms
                    ));
                    self.fallback.engage(cause.clone());
                    cause
                } else {
                    self.fallback.on_timed_out()
                };
                self.fallback_deadline = self.fallback.deadline();
                warn!(session_id = %self.id, cause = %cause, "total timeout elapsed");
                if matches!(cause, VerifyError::NoSignalWithinTimeout(_) | VerifyError::RemoteVerifyFailed(_)) {
                    self.diagnose(cause);
                }
            }
            FallbackEvent::Fire => self.fire_fallback(),
        }
    }

    // =========================================================================
    // Latch paths
    // =========================================================================

    /// Stable or manual fire: verify locally or against the remote verifier
    fn fire_primary(&mut self, reason: FireReason) {
        if self.state.is_terminal() || !self.trigger.try_fire(reason) {
            debug!(session_id = %self.id, %reason, reason_code = ReasonCode::V005_FIRE_IGNORED.code(), "fire ignored");
            return;
        }
        self.stability.cancel();
        self.signal_timer.cancel();
        self.transition(SessionState::Verifying, reason.reason_code());

        match &self.verifier {
            None => self.resolve(reason),
            Some(verifier) => {
                let request = VerifyRequest::from_signal(self.id, self.kind, self.last_signal.as_ref());
                debug!(session_id = %self.id, attempts = self.policy.remote_attempts, "starting remote verification");
                self.pending_verify = Some(
                    verify_with_retries(
                        verifier.clone(),
                        request,
                        self.policy.remote_attempts,
                        self.policy.verify_throttle(),
                    )
                    .boxed(),
                );
            }
        }
    }

    /// Grace elapsed: fire through the fallback path, taking over any
    /// verification still in flight
    fn fire_fallback(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let first = self.trigger.try_fire(FireReason::Fallback);
        if !first {
            debug!(session_id = %self.id, fired_by = ?self.trigger.fired_by(), "fallback taking over");
        }
        self.pending_verify = None;
        self.stability.cancel();
        self.signal_timer.cancel();
        if first {
            self.transition(SessionState::Verifying, ReasonCode::V005_FIRED_FALLBACK);
        }

        if self.policy.strict_mode {
            let cause = self
                .fallback
                .engaged_cause()
                .cloned()
                .unwrap_or(VerifyError::NoSignalWithinTimeout(self.policy.total_timeout_ms));
            self.fail(cause);
        } else {
            self.resolve(FireReason::Fallback);
        }
    }

    fn resolve(&mut self, via: FireReason) {
        if !self.trigger.try_resolve() {
            self.defect("terminal event attempted twice");
            return;
        }
        self.quiesce();
        let verified = Verified {
            session_id: self.id,
            via,
            elapsed_ms: self.elapsed_ms(),
        };
        self.transition(SessionState::Resolved, ReasonCode::V002_STATE_RESOLVED);
        info!(session_id = %self.id, %via, elapsed_ms = verified.elapsed_ms, "verified");
        self.outcome = Some(SessionOutcome::Verified(verified.clone()));
        self.notify(|observer| observer.on_verified(&verified));
    }

    fn fail(&mut self, cause: VerifyError) {
        if !self.trigger.try_resolve() {
            self.defect("terminal event attempted twice");
            return;
        }
        self.quiesce();
        let failure = SessionFailure {
            session_id: self.id,
            cause,
            elapsed_ms: self.elapsed_ms(),
        };
        self.transition(SessionState::FailedFallback, ReasonCode::V002_STATE_FAILED_FALLBACK);
        warn!(session_id = %self.id, cause = %failure.cause, "strict mode: fallback ends in failure");
        self.outcome = Some(SessionOutcome::Failed(failure.clone()));
        self.notify(|observer| observer.on_failed(&failure));
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn quiesce(&mut self) {
        self.fallback.cancel();
        self.stability.cancel();
        self.signal_timer.cancel();
        self.pending_verify = None;
    }

    async fn teardown(&mut self) {
        self.quiesce();
        self.source.stop().await;
    }

    fn set_state(&mut self, state: SessionState) -> bool {
        if self.state == state {
            return false;
        }
        if self.state.is_terminal() {
            self.defect("transition out of a terminal state");
            return false;
        }
        debug!(session_id = %self.id, from = %self.state, to = %state, "state change");
        self.state = state;
        self.state_tx.send_replace(state);
        true
    }

    fn transition(&mut self, state: SessionState, reason: ReasonCode) {
        if self.set_state(state) {
            let snapshot = self.last_snapshot.clone();
            self.publish_status(snapshot, reason);
        }
    }

    /// Push status: every evaluator tick and every transition
    fn publish_status(&mut self, snapshot: StatusSnapshot, reason: ReasonCode) {
        self.last_snapshot = snapshot;
        let output = StatusOutput::new(
            &self.last_snapshot,
            self.state,
            self.elapsed_ms(),
            self.stability.stable_ms(),
            reason,
        );
        let snapshot = &self.last_snapshot;
        self.notify(|observer| observer.on_status_change(snapshot, &output));
    }

    fn diagnose(&mut self, error: VerifyError) {
        debug!(session_id = %self.id, error = error.code(), "diagnostic");
        self.notify(|observer| observer.on_verify_failed(&error));
        self.diagnostics.push(error);
    }

    fn notify(&self, callback: impl FnOnce(&dyn VerificationObserver)) {
        if self.mounted.load(Ordering::Acquire) {
            callback(self.observer.as_ref());
        } else {
            debug!(session_id = %self.id, "unmounted, callback suppressed");
        }
    }

    /// Programming error: loud in debug builds, logged and swallowed in release
    fn defect(&self, message: &str) {
        error!(session_id = %self.id, state = %self.state, "defect: {}", message);
        debug_assert!(false, "{}", message);
    }

    fn elapsed_ms(&self) -> u64 {
        self.ms_since_start(Instant::now())
    }

    fn ms_since_start(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.started_at).as_millis() as u64
    }

    fn report(&self, unmounted: bool) -> SessionReport {
        SessionReport {
            session_id: self.id,
            kind: self.kind,
            final_state: self.state,
            outcome: self.outcome.clone(),
            fired_by: self.trigger.fired_by(),
            triggered_at_ms: self.trigger.triggered_at().map(|t| self.ms_since_start(t)),
            resolved_at_ms: self.trigger.resolved_at().map(|t| self.ms_since_start(t)),
            fallback_deadline_ms: self.fallback_deadline.map(|t| self.ms_since_start(t)),
            unmounted,
            diagnostics: self.diagnostics.clone(),
        }
    }
}
