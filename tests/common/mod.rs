//! Shared helpers for session integration tests

#![allow(dead_code)]

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use facegate::core::{
    RemoteVerifier, Script, ScriptSignal, ScriptedCapability, SessionConfig, SessionHandle,
    VerificationObserver, VerificationSession, VerifyRequest, VerifyResponse,
};
use facegate::types::{
    FallbackPolicy, SessionFailure, SessionState, StatusOutput, StatusSnapshot, Verified, VerifyError,
};

/// Everything a session told its host, stamped with ms since the observer was created
#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub statuses: Vec<(u64, StatusSnapshot, StatusOutput)>,
    pub verified: Vec<(u64, Verified)>,
    pub verify_failed: Vec<(u64, VerifyError)>,
    pub failed: Vec<(u64, SessionFailure)>,
}

pub struct RecordingObserver {
    start: Instant,
    recorded: Mutex<Recorded>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            recorded: Mutex::new(Recorded::default()),
        })
    }

    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> Recorded {
        self.recorded.lock().unwrap().clone()
    }

    pub fn verified(&self) -> Vec<(u64, Verified)> {
        self.snapshot().verified
    }

    pub fn diagnostics(&self) -> Vec<VerifyError> {
        self.snapshot().verify_failed.into_iter().map(|(_, e)| e).collect()
    }

    /// States in the order they were first pushed
    pub fn states(&self) -> Vec<SessionState> {
        let mut states: Vec<SessionState> = Vec::new();
        for (_, _, output) in self.snapshot().statuses {
            if states.last() != Some(&output.state) {
                states.push(output.state);
            }
        }
        states
    }

    pub fn callback_count(&self) -> usize {
        let recorded = self.snapshot();
        recorded.statuses.len() + recorded.verified.len() + recorded.verify_failed.len() + recorded.failed.len()
    }
}

impl VerificationObserver for RecordingObserver {
    fn on_status_change(&self, snapshot: &StatusSnapshot, output: &StatusOutput) {
        let at = self.now_ms();
        self.recorded.lock().unwrap().statuses.push((at, snapshot.clone(), output.clone()));
    }

    fn on_verified(&self, verified: &Verified) {
        let at = self.now_ms();
        self.recorded.lock().unwrap().verified.push((at, verified.clone()));
    }

    fn on_verify_failed(&self, error: &VerifyError) {
        let at = self.now_ms();
        self.recorded.lock().unwrap().verify_failed.push((at, error.clone()));
    }

    fn on_failed(&self, failure: &SessionFailure) {
        let at = self.now_ms();
        self.recorded.lock().unwrap().failed.push((at, failure.clone()));
    }
}

pub fn face(count: u32) -> ScriptSignal {
    ScriptSignal::Faces { count, bounds: vec![], image: None }
}

pub struct Spawned {
    pub handle: SessionHandle,
    pub observer: Arc<RecordingObserver>,
    pub releases: Arc<AtomicUsize>,
}

pub fn spawn_scripted(script: Script, policy: FallbackPolicy) -> Spawned {
    spawn_with(script, policy, None)
}

pub fn spawn_with(script: Script, policy: FallbackPolicy, verifier: Option<Arc<dyn RemoteVerifier>>) -> Spawned {
    let capability = ScriptedCapability::new(script);
    let releases = capability.release_counter();
    let observer = RecordingObserver::new();
    let mut config = SessionConfig::new(Box::new(capability), observer.clone()).with_policy(policy);
    if let Some(verifier) = verifier {
        config = config.with_verifier(verifier);
    }
    let handle = VerificationSession::spawn(config).unwrap();
    Spawned { handle, observer, releases }
}

/// Remote verifier that answers after `latency` with a fixed verdict
pub struct StubVerifier {
    pub verified: bool,
    pub latency: Duration,
    pub calls: Mutex<Vec<u64>>,
    start: Instant,
}

impl StubVerifier {
    pub fn new(verified: bool, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            verified,
            latency,
            calls: Mutex::new(Vec::new()),
            start: Instant::now(),
        })
    }

    /// ms offsets at which calls started
    pub fn call_times(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteVerifier for StubVerifier {
    async fn verify(&self, _request: &VerifyRequest) -> Result<VerifyResponse, VerifyError> {
        self.calls.lock().unwrap().push(self.start.elapsed().as_millis() as u64);
        tokio::time::sleep(self.latency).await;
        Ok(VerifyResponse {
            verified: self.verified,
            message: None,
            error: if self.verified { None } else { Some("face mismatch".into()) },
        })
    }
}
