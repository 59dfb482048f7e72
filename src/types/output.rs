//! Output structures for terminal display

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use crate::types::{ReasonCode, SessionState, StatusSnapshot, VerificationKind};

/// One line of session progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOutput {
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    pub kind: VerificationKind,
    /// Current state
    pub state: SessionState,
    /// Time since session start (milliseconds)
    pub elapsed_ms: u64,
    /// Current ready streak (milliseconds)
    pub stable_ms: u64,
    /// Latest readiness judgement
    pub ready: bool,
    /// Reason for current state
    pub reason: ReasonCode,
    /// Status line for the user
    pub message: String,
}

impl StatusOutput {
    /// Create new output
    pub fn new(
        snapshot: &StatusSnapshot,
        state: SessionState,
        elapsed_ms: u64,
        stable_ms: u64,
        reason: ReasonCode,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: snapshot.kind,
            state,
            elapsed_ms,
            stable_ms,
            ready: snapshot.ready_for_verification,
            reason,
            message: snapshot.message.clone(),
        }
    }

    /// Format for terminal display (with colors)
    pub fn to_terminal_string(&self) -> String {
        let color = self.state.color_code();
        let reset = SessionState::color_reset();
        let emoji = self.state.emoji();

        format!(
            "{}{} {} | state={} | ready={} | stable={:.1}s | {}{}",
            color,
            emoji,
            self.message,
            self.state,
            self.ready,
            self.stable_ms as f64 / 1000.0,
            self.reason.code(),
            reset
        )
    }

    /// Format for parseable output (no colors)
    pub fn to_parseable_string(&self) -> String {
        format!(
            "t={}ms | kind={} | state={} | ready={} | stable={:.1}s | reason={}",
            self.elapsed_ms,
            self.kind,
            self.state,
            self.ready,
            self.stable_ms as f64 / 1000.0,
            self.reason.code()
        )
    }
}
