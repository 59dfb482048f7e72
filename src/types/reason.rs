//! Reason codes for session decisions and state changes

use serde::{Deserialize, Serialize};

/// Who tripped the verification latch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireReason {
    /// Readiness held for the full dwell time
    Stable,
    /// User or host asked to verify now
    Manual,
    /// Fallback controller guaranteeing progress
    Fallback,
}

impl FireReason {
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            FireReason::Stable => ReasonCode::V005_FIRED_STABLE,
            FireReason::Manual => ReasonCode::V005_FIRED_MANUAL,
            FireReason::Fallback => ReasonCode::V005_FIRED_FALLBACK,
        }
    }
}

impl std::fmt::Display for FireReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FireReason::Stable => "stable",
            FireReason::Manual => "manual",
            FireReason::Fallback => "fallback",
        };
        write!(f, "{}", name)
    }
}

/// Reason codes for all state changes and decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum ReasonCode {
    // =========================================================================
    // V001: Readiness
    // =========================================================================
    /// Latest signal satisfies the eligibility policy
    V001_READY,
    /// Latest signal fails the eligibility policy
    V001_NOT_READY,

    // =========================================================================
    // V002: States
    // =========================================================================
    V002_STATE_IDLE,
    V002_STATE_ACQUIRING,
    V002_STATE_STABILIZING,
    V002_STATE_VERIFYING,
    V002_STATE_RESOLVED,
    V002_STATE_FAILED_FALLBACK,

    // =========================================================================
    // V003: Stability
    // =========================================================================
    /// Ready streak running, dwell not yet reached
    V003_STABILITY_ACCUMULATING,
    /// Not-ready observation broke the streak
    V003_STABILITY_RESET,
    /// Dwell reached, promotion scheduled
    V003_STABILITY_REACHED,

    // =========================================================================
    // V004: Degraded sources
    // =========================================================================
    V004_PERMISSION_DENIED,
    V004_HARDWARE_UNAVAILABLE,
    V004_NO_SIGNAL,

    // =========================================================================
    // V005: Latch
    // =========================================================================
    V005_FIRED_STABLE,
    V005_FIRED_MANUAL,
    V005_FIRED_FALLBACK,
    /// Latch already tripped, attempt was a no-op
    V005_FIRE_IGNORED,

    // =========================================================================
    // V006: Remote verification
    // =========================================================================
    V006_REMOTE_VERIFIED,
    V006_REMOTE_REJECTED,
}

impl ReasonCode {
    /// Get the code string (for logging)
    pub fn code(&self) -> &'static str {
        match self {
            Self::V001_READY => "V001_READY",
            Self::V001_NOT_READY => "V001_NOT_READY",
            Self::V002_STATE_IDLE => "V002_STATE_IDLE",
            Self::V002_STATE_ACQUIRING => "V002_STATE_ACQUIRING",
            Self::V002_STATE_STABILIZING => "V002_STATE_STABILIZING",
            Self::V002_STATE_VERIFYING => "V002_STATE_VERIFYING",
            Self::V002_STATE_RESOLVED => "V002_STATE_RESOLVED",
            Self::V002_STATE_FAILED_FALLBACK => "V002_STATE_FAILED_FALLBACK",
            Self::V003_STABILITY_ACCUMULATING => "V003_STABILITY_ACCUMULATING",
            Self::V003_STABILITY_RESET => "V003_STABILITY_RESET",
            Self::V003_STABILITY_REACHED => "V003_STABILITY_REACHED",
            Self::V004_PERMISSION_DENIED => "V004_PERMISSION_DENIED",
            Self::V004_HARDWARE_UNAVAILABLE => "V004_HARDWARE_UNAVAILABLE",
            Self::V004_NO_SIGNAL => "V004_NO_SIGNAL",
            Self::V005_FIRED_STABLE => "V005_FIRED_STABLE",
            Self::V005_FIRED_MANUAL => "V005_FIRED_MANUAL",
            Self::V005_FIRED_FALLBACK => "V005_FIRED_FALLBACK",
            Self::V005_FIRE_IGNORED => "V005_FIRE_IGNORED",
            Self::V006_REMOTE_VERIFIED => "V006_REMOTE_VERIFIED",
            Self::V006_REMOTE_REJECTED => "V006_REMOTE_REJECTED",
        }
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::V001_READY => "Ready for verification",
            Self::V001_NOT_READY => "Not ready",
            Self::V002_STATE_IDLE => "Idle",
            Self::V002_STATE_ACQUIRING => "Acquiring signal",
            Self::V002_STATE_STABILIZING => "Holding steady",
            Self::V002_STATE_VERIFYING => "Verifying",
            Self::V002_STATE_RESOLVED => "Verified",
            Self::V002_STATE_FAILED_FALLBACK => "Verification failed",
            Self::V003_STABILITY_ACCUMULATING => "Building stability",
            Self::V003_STABILITY_RESET => "Stability reset",
            Self::V003_STABILITY_REACHED => "Dwell time reached",
            Self::V004_PERMISSION_DENIED => "Permission denied",
            Self::V004_HARDWARE_UNAVAILABLE => "Hardware unavailable",
            Self::V004_NO_SIGNAL => "No signal within timeout",
            Self::V005_FIRED_STABLE => "Fired after stable readiness",
            Self::V005_FIRED_MANUAL => "Fired manually",
            Self::V005_FIRED_FALLBACK => "Fired by fallback",
            Self::V005_FIRE_IGNORED => "Latch already tripped",
            Self::V006_REMOTE_VERIFIED => "Remote verification passed",
            Self::V006_REMOTE_REJECTED => "Remote verification rejected",
        }
    }

    /// State reason for a session state
    pub fn for_state(state: crate::types::SessionState) -> Self {
        use crate::types::SessionState;
        match state {
            SessionState::Idle => Self::V002_STATE_IDLE,
            SessionState::Acquiring => Self::V002_STATE_ACQUIRING,
            SessionState::Stabilizing => Self::V002_STATE_STABILIZING,
            SessionState::Verifying => Self::V002_STATE_VERIFYING,
            SessionState::Resolved => Self::V002_STATE_RESOLVED,
            SessionState::FailedFallback => Self::V002_STATE_FAILED_FALLBACK,
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}
