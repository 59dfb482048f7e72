//! Observer: the UI collaborator's view of a session

use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use crate::types::{SessionEvent, SessionFailure, StatusOutput, StatusSnapshot, Verified, VerifyError};

/// Callbacks a session makes into its host. Called from the session task.
pub trait VerificationObserver: Send + Sync {
    /// Readiness or state changed
    fn on_status_change(&self, snapshot: &StatusSnapshot, output: &StatusOutput);

    /// Terminal success, exactly once per session
    fn on_verified(&self, verified: &Verified);

    /// Diagnostic only; never terminal
    fn on_verify_failed(&self, error: &VerifyError);

    /// Terminal failure, strict mode only
    fn on_failed(&self, _failure: &SessionFailure) {}
}

/// Republishes callbacks as `SessionEvent`s and remembers the latest status
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<SessionEvent>,
    latest: Arc<RwLock<Option<(StatusSnapshot, StatusOutput)>>>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Latest status pushed by the session
    pub fn latest(&self) -> Option<(StatusSnapshot, StatusOutput)> {
        self.latest.read().ok().and_then(|guard| guard.clone())
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl VerificationObserver for BroadcastObserver {
    fn on_status_change(&self, snapshot: &StatusSnapshot, output: &StatusOutput) {
        if let Ok(mut guard) = self.latest.write() {
            *guard = Some((snapshot.clone(), output.clone()));
        }
        self.publish(SessionEvent::Status {
            snapshot: snapshot.clone(),
            output: output.clone(),
        });
    }

    fn on_verified(&self, verified: &Verified) {
        self.publish(SessionEvent::Verified(verified.clone()));
    }

    fn on_verify_failed(&self, error: &VerifyError) {
        self.publish(SessionEvent::VerifyFailed { error: error.clone() });
    }

    fn on_failed(&self, failure: &SessionFailure) {
        self.publish(SessionEvent::Failed(failure.clone()));
    }
}
