//! Error taxonomy
//!
//! `VerifyError` kinds are all recoverable: the fallback controller absorbs
//! them and they only ever surface through `on_verify_failed` diagnostics.
//! `SourceError` and `ConfigError` are defects of the host, not user conditions.

use serde::{Deserialize, Serialize};
use crate::types::VerificationKind;

/// Recoverable verification problems
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum VerifyError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("hardware unavailable")]
    HardwareUnavailable,

    #[error("no signal within {0}ms")]
    NoSignalWithinTimeout(u64),

    #[error("remote verification failed: {0}")]
    RemoteVerifyFailed(String),

    #[error("transport error: {0}")]
    TransportError(String),
}

impl VerifyError {
    /// Short code for logs and the wire
    pub fn code(&self) -> &'static str {
        match self {
            VerifyError::PermissionDenied => "permission_denied",
            VerifyError::HardwareUnavailable => "hardware_unavailable",
            VerifyError::NoSignalWithinTimeout(_) => "no_signal_within_timeout",
            VerifyError::RemoteVerifyFailed(_) => "remote_verify_failed",
            VerifyError::TransportError(_) => "transport_error",
        }
    }
}

/// Failures reported by a device capability
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("capability feed closed")]
    FeedClosed,
}

/// Misuse of a signal source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("signal source already started")]
    AlreadyStarted,

    #[error("signal source already released")]
    Released,
}

/// Invalid policy or configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("{component} is for {got}, session is {expected}")]
    KindMismatch {
        component: &'static str,
        expected: VerificationKind,
        got: VerificationKind,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
