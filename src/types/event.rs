//! Session events and the final session report

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::types::{FireReason, SessionState, StatusOutput, StatusSnapshot, VerificationKind, VerifyError};

/// Terminal success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verified {
    pub session_id: Uuid,
    /// Path that tripped the latch
    pub via: FireReason,
    /// Time since session start (milliseconds)
    pub elapsed_ms: u64,
}

/// Terminal failure; only reachable with `strict_mode`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub session_id: Uuid,
    /// What engaged the fallback
    pub cause: VerifyError,
    pub elapsed_ms: u64,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Verified(Verified),
    Failed(SessionFailure),
}

/// Live event, mirrors the observer callbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Status {
        snapshot: StatusSnapshot,
        output: StatusOutput,
    },
    VerifyFailed {
        error: VerifyError,
    },
    Verified(Verified),
    Failed(SessionFailure),
}

/// Summary returned when a session task ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub kind: VerificationKind,
    pub final_state: SessionState,
    pub outcome: Option<SessionOutcome>,
    /// Who tripped the latch, if anyone did
    pub fired_by: Option<FireReason>,
    pub triggered_at_ms: Option<u64>,
    pub resolved_at_ms: Option<u64>,
    /// Last known fallback fire deadline
    pub fallback_deadline_ms: Option<u64>,
    /// Ended by unmount rather than a terminal event
    pub unmounted: bool,
    /// Every recoverable problem seen, in order
    pub diagnostics: Vec<VerifyError>,
}

impl SessionReport {
    pub fn is_verified(&self) -> bool {
        matches!(self.outcome, Some(SessionOutcome::Verified(_)))
    }
}
