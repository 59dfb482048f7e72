//! StatusSnapshot: UI-facing readiness judgement

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use crate::types::VerificationKind;

/// One named sub-check of the eligibility rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCheck {
    pub name: String,
    pub passed: bool,
}

impl SubCheck {
    pub fn new(name: impl Into<String>, passed: bool) -> Self {
        Self {
            name: name.into(),
            passed,
        }
    }
}

/// Judgement derived from the latest signal plus static configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub kind: VerificationKind,
    /// Face present / fix acquired
    pub primary_signal_present: bool,
    pub checks: Vec<SubCheck>,
    /// AND of the primary signal and every sub-check
    pub ready_for_verification: bool,
    /// Status line for the UI
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Build a snapshot; readiness is derived, never passed in
    pub fn new(
        kind: VerificationKind,
        primary_signal_present: bool,
        checks: Vec<SubCheck>,
        message: impl Into<String>,
    ) -> Self {
        let ready_for_verification =
            primary_signal_present && checks.iter().all(|c| c.passed);
        Self {
            kind,
            primary_signal_present,
            checks,
            ready_for_verification,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Not-ready snapshot with no sub-checks, used before the first signal
    /// and whenever evaluation cannot proceed
    pub fn not_ready(kind: VerificationKind, message: impl Into<String>) -> Self {
        Self::new(kind, false, Vec::new(), message)
    }

    /// Look up a sub-check by name
    pub fn check(&self, name: &str) -> Option<bool> {
        self.checks.iter().find(|c| c.name == name).map(|c| c.passed)
    }

    /// Same judgement, ignoring timestamps (used to suppress duplicate pushes)
    pub fn same_judgement(&self, other: &StatusSnapshot) -> bool {
        self.kind == other.kind
            && self.primary_signal_present == other.primary_signal_present
            && self.checks == other.checks
            && self.ready_for_verification == other.ready_for_verification
            && self.message == other.message
    }
}
