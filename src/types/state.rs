//! Verification session state definitions

use serde::{Deserialize, Serialize};

/// Lifecycle states of a verification session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Constructed, source not started
    Idle,
    /// Source started, waiting for a ready signal
    Acquiring,
    /// Ready streak in progress, dwell timer armed
    Stabilizing,
    /// Latch tripped, verification in flight
    Verifying,
    /// Terminal: verified (primary or fallback)
    Resolved,
    /// Terminal: strict-mode fallback failure
    FailedFallback,
}

impl SessionState {
    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Resolved | SessionState::FailedFallback)
    }

    /// Get ANSI color code for terminal display
    pub fn color_code(&self) -> &'static str {
        match self {
            SessionState::Idle => "\x1b[90m",           // Gray
            SessionState::Acquiring => "\x1b[90m",      // Gray
            SessionState::Stabilizing => "\x1b[33m",    // Orange/Yellow
            SessionState::Verifying => "\x1b[36m",      // Cyan
            SessionState::Resolved => "\x1b[32m",       // Green
            SessionState::FailedFallback => "\x1b[31m", // Red
        }
    }

    /// Reset ANSI color
    pub fn color_reset() -> &'static str {
        "\x1b[0m"
    }

    /// Get emoji for state
    pub fn emoji(&self) -> &'static str {
        match self {
            SessionState::Idle => "⏸",
            SessionState::Acquiring => "⏳",
            SessionState::Stabilizing => "🔶",
            SessionState::Verifying => "🔍",
            SessionState::Resolved => "✅",
            SessionState::FailedFallback => "🔴",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::Acquiring => "ACQUIRING",
            SessionState::Stabilizing => "STABILIZING",
            SessionState::Verifying => "VERIFYING",
            SessionState::Resolved => "RESOLVED",
            SessionState::FailedFallback => "FAILED_FALLBACK",
        };
        write!(f, "{}", name)
    }
}
